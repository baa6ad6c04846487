use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use ndarray::{Array2, Array3};

/// Reshape a single-element tensor to the `[1, 1, 1]` scalar layout used in dictionaries.
pub fn as_scalar<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, 3> {
    x.reshape([1, 1, 1])
}

pub fn constant<B: Backend>(value: f32, device: &B::Device) -> Tensor<B, 3> {
    let data = Data::new(vec![value], Shape::new([1, 1, 1]));
    Tensor::from_data_device(data.convert(), device)
}

pub fn scalar_value<B: Backend, const D: usize>(x: Tensor<B, D>) -> f32 {
    x.into_data().convert::<f32>().value[0]
}

pub fn mse_loss<B: Backend>(x: Tensor<B, 3>, y: Tensor<B, 3>) -> Tensor<B, 3> {
    let diff = x - y;
    as_scalar((diff.clone() * diff).mean())
}

/// Split `x` along `dim` into consecutive chunks of the given widths.
pub fn split<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    widths: &[usize],
    dim: i32,
) -> Vec<Tensor<B, D>> {
    let dim: usize = if dim < 0 { D - 1 } else { dim as usize };

    let mut current_idx: usize = 0;
    widths
        .iter()
        .map(|width| {
            let mut ranges = x.dims().map(|x| 0..x);
            ranges[dim] = current_idx..current_idx + width;
            current_idx += width;
            x.clone().slice(ranges)
        })
        .collect()
}

pub fn tensor_from_array<B: Backend>(array: &Array3<f32>, device: &B::Device) -> Tensor<B, 3> {
    let (a, b, c) = array.dim();
    let values: Vec<f32> = array.iter().copied().collect();
    let data = Data::new(values, Shape::new([a, b, c]));
    Tensor::from_data_device(data.convert(), device)
}

pub fn array_from_tensor<B: Backend>(x: Tensor<B, 3>) -> Array3<f32> {
    let [a, b, c] = x.dims();
    let values = x.into_data().convert::<f32>().value;
    Array3::from_shape_fn((a, b, c), |(i, j, k)| values[(i * b + j) * c + k])
}

/// Add a singleton sample axis: `(time, feature)` becomes `(time, 1, feature)`.
pub fn with_sample_axis(x: &Array2<f32>) -> Array3<f32> {
    let (rows, cols) = x.dim();
    Array3::from_shape_fn((rows, 1, cols), |(i, _, k)| x[[i, k]])
}
