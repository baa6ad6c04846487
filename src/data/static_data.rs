use std::ops::Range;

use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use ndarray::{concatenate, Array1, Array2, Axis};
use tracing::info;

use super::batcher::StaticBatcher;
use super::sequence::Sequences;
use crate::error::{DpcError, DpcResult};
use crate::modules::component::DataDims;

/// Independent samples (e.g. sampled problem parameters); item `i` is row `i`
/// of every variable, concatenated.
#[derive(Clone, Debug)]
pub struct StaticDataset {
    name: String,
    slices: Vec<(String, Range<usize>)>,
    samples: Array2<f32>,
}

impl StaticDataset {
    pub fn new(data: Sequences, name: &str) -> DpcResult<Self> {
        let nsamples = match data.values().next() {
            Some(first) => first.nrows(),
            None => return Err(DpcError::Config(format!("dataset `{name}` has no variables"))),
        };
        if let Some((key, value)) = data.iter().find(|(_, v)| v.nrows() != nsamples) {
            return Err(DpcError::Config(format!(
                "variable `{key}` has {} samples, expected {nsamples}",
                value.nrows()
            )));
        }

        let mut slices = Vec::with_capacity(data.len());
        let mut offset = 0;
        for (key, value) in data.iter() {
            slices.push((key.clone(), offset..offset + value.ncols()));
            offset += value.ncols();
        }

        let views: Vec<_> = data.values().map(|v| v.view()).collect();
        let samples = concatenate(Axis(1), &views)
            .map_err(|err| DpcError::Config(format!("cannot concatenate `{name}`: {err}")))?;

        info!(dataset = name, nsamples, "built static dataset");

        Ok(Self {
            name: name.to_string(),
            slices,
            samples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slices(&self) -> &[(String, Range<usize>)] {
        &self.slices
    }

    pub fn dims(&self) -> DataDims {
        self.slices
            .iter()
            .map(|(key, range)| (key.clone(), range.len()))
            .collect()
    }

    pub fn batcher<B: Backend>(&self, device: B::Device) -> StaticBatcher<B> {
        StaticBatcher::new(device, self.name.clone(), self.slices.clone())
    }
}

impl Dataset<Array1<f32>> for StaticDataset {
    fn get(&self, index: usize) -> Option<Array1<f32>> {
        (index < self.samples.nrows()).then(|| self.samples.row(index).to_owned())
    }

    fn len(&self) -> usize {
        self.samples.nrows()
    }
}
