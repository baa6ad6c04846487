pub mod batcher;
pub mod dict;
pub mod normalization;
pub mod sequence;
pub mod split;
pub mod static_data;

use burn::config::Config;

pub use batcher::{SequenceBatcher, StaticBatcher};
pub use dict::DataDict;
pub use normalization::{NormStats, NormType, SequenceStats};
pub use sequence::{SequenceDataset, SequenceDatasetConfig, SequenceItem, Sequences};
pub use static_data::StaticDataset;

use crate::error::DpcResult;

#[derive(Config, Debug)]
pub struct SequencePipelineConfig {
    pub nsteps: usize,

    #[config(default = false)]
    pub moving_horizon: bool,

    #[config(default = "Some(NormType::ZeroOne)")]
    pub norm_type: Option<NormType>,

    #[config(default = "None")]
    pub split_ratio: Option<[f32; 2]>,
}

/// Train, dev and test sequence datasets together with the normalization
/// statistics used to build them.
#[derive(Clone, Debug)]
pub struct SequenceSplits {
    pub train: SequenceDataset,
    pub dev: SequenceDataset,
    pub test: SequenceDataset,
    pub stats: Option<SequenceStats>,
}

impl SequencePipelineConfig {
    /// Normalize, split and window `data`.
    pub fn init(&self, data: Sequences) -> DpcResult<SequenceSplits> {
        let (data, stats) = match self.norm_type {
            Some(norm) => {
                let (data, stats) = normalization::normalize_sequences(&data, norm);
                (data, Some(stats))
            }
            None => (data, None),
        };
        let (train, dev, test) = split::split_sequences(&data, self.split_ratio)?;

        let dataset = |data: Sequences, name: &str| {
            SequenceDataset::new(data, self.nsteps, self.moving_horizon, name)
        };
        Ok(SequenceSplits {
            train: dataset(train, "train")?,
            dev: dataset(dev, "dev")?,
            test: dataset(test, "test")?,
            stats,
        })
    }
}

/// Sample-set counterpart of [`SequencePipelineConfig`] for static datasets.
pub fn static_splits(
    data: Sequences,
    norm_type: Option<NormType>,
    split_ratio: Option<[f32; 2]>,
) -> DpcResult<(StaticDataset, StaticDataset, StaticDataset)> {
    let data = match norm_type {
        Some(norm) => normalization::normalize_sequences(&data, norm).0,
        None => data,
    };
    let (train, dev, test) = split::split_sequences(&data, split_ratio)?;
    Ok((
        StaticDataset::new(train, "train")?,
        StaticDataset::new(dev, "dev")?,
        StaticDataset::new(test, "test")?,
    ))
}
