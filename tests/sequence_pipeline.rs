use burn::backend::NdArray;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use ndarray::{concatenate, Array, Array2, Axis};

use dpc::data::normalization::{all_close, denormalize, normalize, NormType};
use dpc::data::sequence::{batch_windows, num_windows, unbatch_windows};
use dpc::data::{SequencePipelineConfig, Sequences};
use dpc::utils::array_from_tensor;
use dpc::DpcError;

type TestBackend = NdArray;

fn ramp(nsim: usize, cols: usize) -> Array2<f32> {
    Array::range(0.0, (nsim * cols) as f32, 1.0)
        .into_shape((nsim, cols))
        .unwrap()
}

#[test]
fn window_counts() {
    for (nsim, nsteps) in [(12, 3), (10, 4), (7, 7), (9, 1)] {
        let x = ramp(nsim, 2);

        let moving = batch_windows(&x, nsteps, true).unwrap();
        assert_eq!(moving.dim(), (nsteps, nsim - nsteps + 1, 2));
        assert_eq!(num_windows(nsim, nsteps, true), nsim - nsteps + 1);

        let chunked = batch_windows(&x, nsteps, false).unwrap();
        assert_eq!(chunked.dim(), (nsteps, nsim / nsteps, 2));
        assert_eq!(num_windows(nsim, nsteps, false), nsim / nsteps);
    }
}

#[test]
fn unbatch_inverts_batch() {
    let x = ramp(12, 2);
    for nsteps in 1..=12 {
        let windows = batch_windows(&x, nsteps, true).unwrap();
        assert_eq!(unbatch_windows(&windows, true), x);
    }
    for nsteps in [1, 2, 3, 4, 6, 12] {
        let windows = batch_windows(&x, nsteps, false).unwrap();
        assert_eq!(unbatch_windows(&windows, false), x);
    }
}

#[test]
fn twelve_step_ramp_items() {
    let data = Sequences::from([("Y".to_string(), ramp(12, 1))]);
    let splits = dpc::data::SequenceDatasetConfig::new(3)
        .with_moving_horizon(true)
        .with_name("train".into())
        .init(data)
        .unwrap();

    assert_eq!(splits.num_windows(), 10);
    assert_eq!(splits.len(), 9);

    let item = splits.get(0).unwrap();
    assert_eq!(item.past.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
    assert_eq!(item.future.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    assert!(splits.get(9).is_none());

    let items = (0..4).filter_map(|i| splits.get(i)).collect();
    let batch = splits.batcher::<TestBackend>(Default::default()).batch(items);
    assert_eq!(batch.name(), "nstep_train");

    let yp = array_from_tensor(batch.get("Yp").unwrap().clone());
    let yf = array_from_tensor(batch.get("Yf").unwrap().clone());
    assert_eq!(yp.dim(), (3, 4, 1));
    // sample 3 starts at offset 3, its future one step later
    assert_eq!(yp[[0, 3, 0]], 3.0);
    assert_eq!(yf[[0, 3, 0]], 4.0);
}

#[test]
fn horizon_must_fit_the_series() {
    let data = Sequences::from([("Y".to_string(), ramp(5, 1))]);
    let result = dpc::data::SequenceDataset::new(data, 5, true, "train");
    assert!(matches!(result, Err(DpcError::Config(_))));

    let ragged = Sequences::from([
        ("Y".to_string(), ramp(5, 1)),
        ("U".to_string(), ramp(6, 1)),
    ]);
    let result = dpc::data::SequenceDataset::new(ragged, 2, true, "train");
    assert!(matches!(result, Err(DpcError::Config(_))));
}

#[test]
fn open_loop_splits_reconstruct_the_series() {
    let data = Sequences::from([
        ("Y".to_string(), ramp(31, 2)),
        ("U".to_string(), ramp(31, 1) * 0.5),
    ]);
    let splits = SequencePipelineConfig::new(2)
        .with_moving_horizon(true)
        .with_norm_type(None)
        .init(data.clone())
        .unwrap();
    assert_eq!(splits.train.nsim(), 10);
    assert_eq!(splits.test.nsim(), 11);

    let parts = [&splits.train, &splits.dev, &splits.test]
        .map(|dataset| dataset.open_loop().unwrap());
    for (key, original) in data.iter() {
        let joined = concatenate![
            Axis(0),
            parts[0][key].view(),
            parts[1][key].view(),
            parts[2][key].view()
        ];
        assert_eq!(&joined, original);
    }

    let full = splits.dev.get_full_sequence::<TestBackend>(&Default::default());
    assert_eq!(full.name(), "loop_dev");
    assert_eq!(full.get("Yp").unwrap().dims(), [8, 1, 2]);
    assert_eq!(full.get("Uf").unwrap().dims(), [8, 1, 1]);
}

#[test]
fn normalization_round_trips() {
    let mut m = ramp(6, 3);
    m.column_mut(1).fill(4.0);

    for norm in [NormType::ZeroOne, NormType::OneOne] {
        let (normalized, stats) = normalize(&m, norm);
        assert!(normalized.iter().all(|v| v.is_finite()));
        assert!(normalized.column(1).iter().all(|v| *v == 0.0));

        let restored = denormalize(&normalized, &stats, norm).unwrap();
        assert!(all_close(&restored, &m, 1e-4));
    }
}
