use std::collections::BTreeMap;
use std::ops::Range;

use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use ndarray::{concatenate, s, Array2, Array3, Axis};
use tracing::info;

use super::batcher::SequenceBatcher;
use super::dict::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::modules::component::DataDims;
use crate::utils::{tensor_from_array, with_sample_axis};

/// Named raw series, each `(time, feature)`.
pub type Sequences = BTreeMap<String, Array2<f32>>;

fn stride(nsteps: usize, moving_horizon: bool) -> usize {
    if moving_horizon {
        1
    } else {
        nsteps
    }
}

/// Number of windows of length `nsteps` cut from `nsim` rows.
pub fn num_windows(nsim: usize, nsteps: usize, moving_horizon: bool) -> usize {
    if nsteps == 0 || nsteps > nsim {
        return 0;
    }
    (nsim - nsteps) / stride(nsteps, moving_horizon) + 1
}

/// Cut `x` into windows laid out `(nsteps, samples, feature)`.
///
/// Moving horizon windows overlap with stride 1; chunked windows are disjoint
/// and trailing rows that do not fill a window are dropped.
pub fn batch_windows(x: &Array2<f32>, nsteps: usize, moving_horizon: bool) -> DpcResult<Array3<f32>> {
    let (nsim, width) = x.dim();
    let count = num_windows(nsim, nsteps, moving_horizon);
    if count == 0 {
        return Err(DpcError::Config(format!(
            "horizon {nsteps} does not fit a sequence of length {nsim}"
        )));
    }

    let stride = stride(nsteps, moving_horizon);
    let mut windows = Array3::zeros((nsteps, count, width));
    for i in 0..count {
        let start = i * stride;
        windows
            .slice_mut(s![.., i, ..])
            .assign(&x.slice(s![start..start + nsteps, ..]));
    }
    Ok(windows)
}

/// Reassemble windows produced by [`batch_windows`] into one `(time, feature)` series.
pub fn unbatch_windows(windows: &Array3<f32>, moving_horizon: bool) -> Array2<f32> {
    let (nsteps, samples, width) = windows.dim();
    if samples == 0 {
        return Array2::zeros((0, width));
    }

    if moving_horizon {
        let heads = windows.index_axis(Axis(0), 0);
        let tail = windows.slice(s![1.., samples - 1, ..]);
        concatenate![Axis(0), heads, tail]
    } else {
        let mut series = Array2::zeros((nsteps * samples, width));
        for i in 0..samples {
            series
                .slice_mut(s![i * nsteps..(i + 1) * nsteps, ..])
                .assign(&windows.slice(s![.., i, ..]));
        }
        series
    }
}

/// One dataset item: the past window and the window after it, all variables concatenated.
#[derive(Clone, Debug)]
pub struct SequenceItem {
    pub past: Array2<f32>,
    pub future: Array2<f32>,
}

#[derive(Config, Debug)]
pub struct SequenceDatasetConfig {
    pub nsteps: usize,

    #[config(default = false)]
    pub moving_horizon: bool,

    #[config(default = "String::from(\"data\")")]
    pub name: String,
}

impl SequenceDatasetConfig {
    pub fn init(&self, data: Sequences) -> DpcResult<SequenceDataset> {
        SequenceDataset::new(data, self.nsteps, self.moving_horizon, &self.name)
    }
}

/// Past/future windows over a set of named series sharing one time axis.
///
/// Item `i` holds window `i` as the past and window `i + 1` as the future, so
/// the dataset has one item fewer than there are windows.
#[derive(Clone, Debug)]
pub struct SequenceDataset {
    name: String,
    nsteps: usize,
    nsim: usize,
    moving_horizon: bool,
    slices: Vec<(String, Range<usize>)>,
    full_data: Array2<f32>,
    windows: Array3<f32>,
}

impl SequenceDataset {
    pub fn new(
        data: Sequences,
        nsteps: usize,
        moving_horizon: bool,
        name: &str,
    ) -> DpcResult<Self> {
        let nsim = match data.values().next() {
            Some(first) => first.nrows(),
            None => return Err(DpcError::Config(format!("dataset `{name}` has no variables"))),
        };
        if let Some((key, value)) = data.iter().find(|(_, v)| v.nrows() != nsim) {
            return Err(DpcError::Config(format!(
                "variable `{key}` has {} rows, expected {nsim}",
                value.nrows()
            )));
        }
        if nsteps == 0 || nsteps >= nsim {
            return Err(DpcError::Config(format!(
                "horizon {nsteps} must be in 1..{nsim} for dataset `{name}`"
            )));
        }

        let mut slices = Vec::with_capacity(data.len());
        let mut offset = 0;
        for (key, value) in data.iter() {
            slices.push((key.clone(), offset..offset + value.ncols()));
            offset += value.ncols();
        }

        let views: Vec<_> = data.values().map(|v| v.view()).collect();
        let full_data = concatenate(Axis(1), &views)
            .map_err(|err| DpcError::Config(format!("cannot concatenate `{name}`: {err}")))?;
        let windows = batch_windows(&full_data, nsteps, moving_horizon)?;

        info!(
            dataset = name,
            nsim,
            nsteps,
            moving_horizon,
            windows = windows.dim().1,
            "built sequence dataset"
        );

        Ok(Self {
            name: name.to_string(),
            nsteps,
            nsim,
            moving_horizon,
            slices,
            full_data,
            windows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn nsim(&self) -> usize {
        self.nsim
    }

    pub fn moving_horizon(&self) -> bool {
        self.moving_horizon
    }

    pub fn num_windows(&self) -> usize {
        self.windows.dim().1
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|(key, _)| key.as_str())
    }

    /// Column range of each variable inside the concatenated feature axis.
    pub fn slices(&self) -> &[(String, Range<usize>)] {
        &self.slices
    }

    /// Feature widths of `k`, `kp` and `kf` for every variable `k`.
    pub fn dims(&self) -> DataDims {
        let mut dims = DataDims::new();
        for (key, range) in &self.slices {
            let width = range.len();
            dims.insert(key.clone(), width);
            dims.insert(format!("{key}p"), width);
            dims.insert(format!("{key}f"), width);
        }
        dims
    }

    pub fn batcher<B: Backend>(&self, device: B::Device) -> SequenceBatcher<B> {
        SequenceBatcher::new(device, format!("nstep_{}", self.name), self.slices.clone())
    }

    /// The unbatched trajectory per variable: past rows `[0, nsim - nsteps)` under
    /// `kp` and future rows `[nsteps, nsim)` under `kf`.
    pub fn full_sequence_arrays(&self) -> Sequences {
        let mut sequences = Sequences::new();
        for (key, range) in &self.slices {
            let columns = self.full_data.slice(s![.., range.clone()]);
            sequences.insert(
                format!("{key}p"),
                columns.slice(s![..self.nsim - self.nsteps, ..]).to_owned(),
            );
            sequences.insert(
                format!("{key}f"),
                columns.slice(s![self.nsteps.., ..]).to_owned(),
            );
        }
        sequences
    }

    /// [`Self::full_sequence_arrays`] as a `loop_{name}` dictionary with a singleton batch axis.
    pub fn get_full_sequence<B: Backend>(&self, device: &B::Device) -> DataDict<B> {
        let tensors = self
            .full_sequence_arrays()
            .into_iter()
            .map(|(key, value)| (key, tensor_from_array(&with_sample_axis(&value), device)));
        DataDict::from_tensors(format!("loop_{}", self.name), tensors)
    }

    /// Rebuild each variable's full series from its open-loop past/future pair.
    pub fn open_loop(&self) -> DpcResult<Sequences> {
        if self.nsim < 2 * self.nsteps {
            return Err(DpcError::Config(format!(
                "open-loop reconstruction of `{}` needs at least {} rows, got {}",
                self.name,
                2 * self.nsteps,
                self.nsim
            )));
        }

        let full = self.full_sequence_arrays();
        let mut sequences = Sequences::new();
        for (key, _) in &self.slices {
            let (past, future) = match (full.get(&format!("{key}p")), full.get(&format!("{key}f"))) {
                (Some(past), Some(future)) => (past, future),
                _ => return Err(DpcError::missing_key(&self.name, key)),
            };
            let tail = future.slice(s![future.nrows() - self.nsteps.., ..]);
            sequences.insert(key.clone(), concatenate![Axis(0), past.view(), tail]);
        }
        Ok(sequences)
    }
}

impl Dataset<SequenceItem> for SequenceDataset {
    fn get(&self, index: usize) -> Option<SequenceItem> {
        if index >= self.len() {
            return None;
        }
        Some(SequenceItem {
            past: self.windows.index_axis(Axis(1), index).to_owned(),
            future: self.windows.index_axis(Axis(1), index + 1).to_owned(),
        })
    }

    fn len(&self) -> usize {
        self.num_windows().saturating_sub(1)
    }
}
