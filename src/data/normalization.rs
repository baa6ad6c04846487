use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::sequence::Sequences;
use crate::error::{DpcError, DpcResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormType {
    /// Scale each column to `[0, 1]`.
    ZeroOne,
    /// Scale each column to `[-1, 1]`.
    OneOne,
}

/// Per-column extremes of one variable.
#[derive(Clone, Debug, PartialEq)]
pub struct NormStats {
    pub min: Array1<f32>,
    pub max: Array1<f32>,
}

impl NormStats {
    pub fn from_data(m: &Array2<f32>) -> Self {
        let min = m.fold_axis(Axis(0), f32::INFINITY, |acc, &v| acc.min(v));
        let max = m.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &v| acc.max(v));
        Self { min, max }
    }

    fn check_width(&self, m: &Array2<f32>) -> DpcResult<()> {
        if self.min.len() != m.ncols() {
            return Err(DpcError::Config(format!(
                "normalization stats cover {} columns but data has {}",
                self.min.len(),
                m.ncols()
            )));
        }
        Ok(())
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Min-max normalize `m` column-wise with its own statistics.
pub fn normalize(m: &Array2<f32>, norm: NormType) -> (Array2<f32>, NormStats) {
    let stats = NormStats::from_data(m);
    let normalized = apply(m, &stats, norm);
    (normalized, stats)
}

/// Min-max normalize `m` with statistics computed elsewhere (e.g. on the train split).
pub fn normalize_with(m: &Array2<f32>, stats: &NormStats, norm: NormType) -> DpcResult<Array2<f32>> {
    stats.check_width(m)?;
    Ok(apply(m, stats, norm))
}

fn apply(m: &Array2<f32>, stats: &NormStats, norm: NormType) -> Array2<f32> {
    let range = &stats.max - &stats.min;
    if range.iter().any(|r| *r == 0.0) {
        warn!("zero-range column collapsed to zero during normalization");
    }

    let mut out = m.clone();
    for (mut column, (min, range)) in out
        .axis_iter_mut(Axis(1))
        .zip(stats.min.iter().zip(range.iter()))
    {
        column.mapv_inplace(|v| {
            let unit = finite_or_zero((v - min) / range);
            match norm {
                NormType::ZeroOne => unit,
                NormType::OneOne if *range == 0.0 => 0.0,
                NormType::OneOne => 2.0 * unit - 1.0,
            }
        });
    }
    out
}

/// Inverse of [`normalize`].
pub fn denormalize(m: &Array2<f32>, stats: &NormStats, norm: NormType) -> DpcResult<Array2<f32>> {
    stats.check_width(m)?;

    let mut out = m.clone();
    for (mut column, (min, max)) in out
        .axis_iter_mut(Axis(1))
        .zip(stats.min.iter().zip(stats.max.iter()))
    {
        let range = max - min;
        column.mapv_inplace(|v| {
            let unit = match norm {
                NormType::ZeroOne => v,
                NormType::OneOne => (v + 1.0) / 2.0,
            };
            finite_or_zero(unit * range + min)
        });
    }
    Ok(out)
}

pub type SequenceStats = BTreeMap<String, NormStats>;

pub fn normalize_sequences(data: &Sequences, norm: NormType) -> (Sequences, SequenceStats) {
    let mut normalized = Sequences::new();
    let mut stats = SequenceStats::new();
    for (key, value) in data {
        let (value, value_stats) = normalize(value, norm);
        normalized.insert(key.clone(), value);
        stats.insert(key.clone(), value_stats);
    }
    (normalized, stats)
}

pub fn normalize_sequences_with(
    data: &Sequences,
    stats: &SequenceStats,
    norm: NormType,
) -> DpcResult<Sequences> {
    data.iter()
        .map(|(key, value)| {
            let key_stats = stats
                .get(key)
                .ok_or_else(|| DpcError::missing_key("normalization", key))?;
            Ok((key.clone(), normalize_with(value, key_stats, norm)?))
        })
        .collect()
}

pub fn denormalize_sequences(
    data: &Sequences,
    stats: &SequenceStats,
    norm: NormType,
) -> DpcResult<Sequences> {
    data.iter()
        .map(|(key, value)| {
            let key_stats = stats
                .get(key)
                .ok_or_else(|| DpcError::missing_key("normalization", key))?;
            Ok((key.clone(), denormalize(value, key_stats, norm)?))
        })
        .collect()
}

/// True when every element of `a` is within `tol` of `b`.
pub fn all_close(a: &Array2<f32>, b: &Array2<f32>, tol: f32) -> bool {
    a.dim() == b.dim() && Zip::from(a).and(b).all(|x, y| (x - y).abs() <= tol)
}
