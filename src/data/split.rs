use std::ops::Range;

use ndarray::s;

use super::sequence::Sequences;
use crate::error::{DpcError, DpcResult};

/// Contiguous train, dev and test row ranges over `nsim` rows.
///
/// `ratio` holds the train and dev shares in percent and defaults to equal
/// thirds of `nsim / 3` rows, the test split taking the remainder.
/// Percentages are rounded down to whole rows.
pub fn split_ranges(nsim: usize, ratio: Option<[f32; 2]>) -> DpcResult<[Range<usize>; 3]> {
    let (train_len, dev_len) = match ratio {
        None => (nsim / 3, nsim / 3),
        Some([train, dev]) => {
            let valid = |pct: f32| pct.is_finite() && pct > 0.0 && pct < 100.0;
            if !valid(train) || !valid(dev) || train + dev >= 100.0 {
                return Err(DpcError::Config(format!(
                    "split ratio [{train}, {dev}] must be positive percentages summing below 100"
                )));
            }
            let rows = |pct: f32| (nsim as f64 * pct as f64 / 100.0).floor() as usize;
            (rows(train), rows(dev))
        }
    };

    let dev_end = train_len + dev_len;
    if train_len == 0 || dev_len == 0 || dev_end >= nsim {
        return Err(DpcError::Config(format!(
            "{nsim} rows are too few to split into non-empty train, dev and test sets"
        )));
    }
    Ok([0..train_len, train_len..dev_end, dev_end..nsim])
}

/// Split every variable along its leading axis into train, dev and test, in that order.
pub fn split_sequences(
    data: &Sequences,
    ratio: Option<[f32; 2]>,
) -> DpcResult<(Sequences, Sequences, Sequences)> {
    let nsim = data
        .values()
        .map(|v| v.nrows())
        .min()
        .ok_or_else(|| DpcError::Config("cannot split an empty dataset".to_string()))?;
    let [train, dev, test] = split_ranges(nsim, ratio)?;

    let take = |range: &Range<usize>| -> Sequences {
        data.iter()
            .map(|(key, value)| (key.clone(), value.slice(s![range.clone(), ..]).to_owned()))
            .collect()
    };
    Ok((take(&train), take(&dev), take(&test)))
}
