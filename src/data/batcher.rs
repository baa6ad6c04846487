use std::ops::Range;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use ndarray::{Array1, Array2};

use super::dict::DataDict;
use super::sequence::SequenceItem;
use crate::utils::split;

fn window_tensor<B: Backend>(window: &Array2<f32>, device: &B::Device) -> Tensor<B, 3> {
    let (steps, width) = window.dim();
    let data = Data::new(
        window.iter().copied().collect(),
        Shape::new([1, steps, width]),
    );
    Tensor::from_data_device(data.convert(), device)
}

fn named<B: Backend>(
    x: Tensor<B, 3>,
    slices: &[(String, Range<usize>)],
    suffix: &str,
) -> Vec<(String, Tensor<B, 3>)> {
    let widths: Vec<usize> = slices.iter().map(|(_, range)| range.len()).collect();
    slices
        .iter()
        .zip(split(x, &widths, -1))
        .map(|(key, tensor)| (format!("{}{suffix}", key.0), tensor))
        .collect()
}

/// Collates [`SequenceItem`]s into `(time, batch, feature)` tensors keyed `kp`/`kf`.
pub struct SequenceBatcher<B: Backend> {
    device: B::Device,
    name: String,
    slices: Vec<(String, Range<usize>)>,
}

impl<B: Backend> SequenceBatcher<B> {
    pub fn new(device: B::Device, name: String, slices: Vec<(String, Range<usize>)>) -> Self {
        Self {
            device,
            name,
            slices,
        }
    }
}

impl<B: Backend> Batcher<SequenceItem, DataDict<B>> for SequenceBatcher<B> {
    fn batch(&self, items: Vec<SequenceItem>) -> DataDict<B> {
        if items.is_empty() {
            return DataDict::new(self.name.clone());
        }
        let (past, future): (Vec<Tensor<B, 3>>, Vec<Tensor<B, 3>>) = items
            .iter()
            .map(|item| {
                (
                    window_tensor(&item.past, &self.device),
                    window_tensor(&item.future, &self.device),
                )
            })
            .unzip();

        // [batch, time, feature] -> [time, batch, feature]
        let past = Tensor::cat(past, 0).swap_dims(0, 1);
        let future = Tensor::cat(future, 0).swap_dims(0, 1);

        let tensors = named(past, &self.slices, "p")
            .into_iter()
            .chain(named(future, &self.slices, "f"));

        DataDict::from_tensors(self.name.clone(), tensors)
    }
}

/// Collates static samples into `(1, batch, feature)` tensors keyed by variable name.
pub struct StaticBatcher<B: Backend> {
    device: B::Device,
    name: String,
    slices: Vec<(String, Range<usize>)>,
}

impl<B: Backend> StaticBatcher<B> {
    pub fn new(device: B::Device, name: String, slices: Vec<(String, Range<usize>)>) -> Self {
        Self {
            device,
            name,
            slices,
        }
    }
}

impl<B: Backend> Batcher<Array1<f32>, DataDict<B>> for StaticBatcher<B> {
    fn batch(&self, items: Vec<Array1<f32>>) -> DataDict<B> {
        if items.is_empty() {
            return DataDict::new(self.name.clone());
        }
        let batch_size = items.len();
        let width = items.first().map(|item| item.len()).unwrap_or(0);
        let data = Data::new(
            items.iter().flat_map(|item| item.iter().copied()).collect(),
            Shape::new([1, batch_size, width]),
        );
        let samples: Tensor<B, 3> = Tensor::from_data_device(data.convert(), &self.device);

        DataDict::from_tensors(self.name.clone(), named(samples, &self.slices, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sequence::{SequenceDataset, Sequences};
    use crate::utils::array_from_tensor;
    use burn::backend::NdArray;
    use burn::data::dataset::Dataset;
    use ndarray::Array;

    type TestBackend = NdArray;

    #[test]
    fn collate_puts_time_first() {
        let y = Array::range(0.0, 12.0, 1.0).into_shape((12, 1)).unwrap();
        let u = Array::range(100.0, 124.0, 1.0).into_shape((12, 2)).unwrap();
        let data = Sequences::from([("U".to_string(), u), ("Y".to_string(), y)]);
        let ds = SequenceDataset::new(data, 3, true, "train").unwrap();

        let batcher = ds.batcher::<TestBackend>(Default::default());
        let items = (0..4).filter_map(|i| ds.get(i)).collect();
        let batch = batcher.batch(items);

        assert_eq!(batch.name(), "nstep_train");
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.get("Yp").unwrap().dims(), [3, 4, 1]);
        assert_eq!(batch.get("Uf").unwrap().dims(), [3, 4, 2]);

        let yf = array_from_tensor(batch.get("Yf").unwrap().clone());
        // sample 2 future window starts at raw step 3
        assert_eq!(yf[[0, 2, 0]], 3.0);
        assert_eq!(yf[[2, 2, 0]], 5.0);
    }

    #[test]
    fn empty_batches_hold_no_keys() {
        let y = Array::range(0.0, 12.0, 1.0).into_shape((12, 1)).unwrap();
        let data = Sequences::from([("Y".to_string(), y)]);
        let ds = SequenceDataset::new(data, 3, true, "train").unwrap();
        let batch = ds.batcher::<TestBackend>(Default::default()).batch(vec![]);
        assert_eq!(batch.name(), "nstep_train");
        assert!(batch.is_empty());

        let batcher = StaticBatcher::<TestBackend>::new(
            Default::default(),
            "train".to_string(),
            vec![("x".to_string(), 0..2)],
        );
        let batch = batcher.batch(vec![]);
        assert_eq!(batch.name(), "train");
        assert!(batch.is_empty());
    }
}
