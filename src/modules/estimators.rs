//! State estimators: map a window of past observations to an initial state `x0`.

use burn::config::Config;
use burn::tensor::{backend::Backend, Tensor};

use super::activation::Activation;
use super::blocks::{Mlp, MlpConfig};
use super::component::{
    output_key, static_features, window_features, Component, DataDims, Interface,
};
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::utils::constant;

#[derive(Config, Debug)]
pub struct TimeDelayEstimatorConfig {
    name: String,
    /// State dimension of the estimate.
    nx: usize,

    #[config(default = "vec![String::from(\"Yp\")]")]
    input_keys: Vec<String>,

    /// Inputs without a time axis, used as is.
    #[config(default = "vec![]")]
    static_keys: Vec<String>,

    #[config(default = 1)]
    nsteps: usize,

    /// Number of most recent past steps fed to the network.
    #[config(default = 1)]
    window_size: usize,

    #[config(default = "vec![64]")]
    hsizes: Vec<usize>,

    #[config(default = false)]
    bias: bool,

    #[config(default = "Activation::Gelu")]
    activation: Activation,
}

impl TimeDelayEstimatorConfig {
    pub fn init<B: Backend>(&self, dims: &DataDims) -> DpcResult<TimeDelayEstimator<B>> {
        if self.window_size == 0 || self.window_size > self.nsteps {
            return Err(DpcError::Config(format!(
                "{}: window size {} must be in 1..={} (the horizon)",
                self.name, self.window_size, self.nsteps
            )));
        }

        let x0 = output_key("x0", &self.name);
        let reg = output_key("reg_error", &self.name);
        let interface = Interface::new(
            self.name.clone(),
            self.input_keys
                .iter()
                .chain(self.static_keys.iter())
                .cloned()
                .collect(),
            vec![x0.clone(), reg.clone()],
        )?
        .with_dims(dims)
        .with_width(&x0, self.nx)
        .with_width(&reg, 1);

        let sequence_width: usize = self
            .input_keys
            .iter()
            .map(|key| interface.width(key))
            .sum::<DpcResult<usize>>()?;
        let static_width: usize = self
            .static_keys
            .iter()
            .map(|key| interface.width(key))
            .sum::<DpcResult<usize>>()?;
        let in_features = static_width + self.window_size * sequence_width;

        let net = MlpConfig::new(in_features, self.nx)
            .with_hsizes(self.hsizes.clone())
            .with_bias(self.bias)
            .init();

        Ok(TimeDelayEstimator {
            interface,
            net,
            nsteps: self.nsteps,
            window_size: self.window_size,
            num_sequences: self.input_keys.len(),
            activation: self.activation,
        })
    }
}

/// Estimates `x0_{name}` from the last `window_size` steps of each sequence
/// input (up to the horizon) plus any static inputs.
pub struct TimeDelayEstimator<B: Backend> {
    interface: Interface,
    net: Mlp<B>,
    nsteps: usize,
    window_size: usize,
    num_sequences: usize,
    activation: Activation,
}

impl<B: Backend> TimeDelayEstimator<B> {
    pub fn net(&self) -> &Mlp<B> {
        &self.net
    }

    fn features(&self, data: &DataDict<B>) -> DpcResult<Tensor<B, 2>> {
        let name = self.interface.name();
        let steps = self.nsteps - self.window_size..self.nsteps;

        let features = self
            .interface
            .input_keys()
            .iter()
            .zip(self.interface.inputs(data)?)
            .enumerate()
            .map(|(i, (key, x))| {
                if i < self.num_sequences {
                    window_features(name, key, x, steps.clone())
                } else {
                    static_features(name, key, x)
                }
            })
            .collect::<DpcResult<Vec<_>>>()?;

        Ok(Tensor::cat(features, 1))
    }
}

impl<B: Backend> Component<B> for TimeDelayEstimator<B> {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let features = self.features(data)?;
        let [batch, _] = features.dims();
        let device = features.device();

        let x0 = self.net.forward(features, self.activation);
        let nx = x0.dims()[1];

        self.interface.outputs(
            data.name(),
            vec![x0.reshape([1, batch, nx]), constant(0.0, &device)],
        )
    }
}

/// Takes the last past observation as the state estimate; for systems whose
/// state is measured directly.
pub struct FullyObservable {
    interface: Interface,
    nsteps: usize,
}

impl FullyObservable {
    pub fn new(name: &str, key: &str, nsteps: usize, dims: &DataDims) -> DpcResult<Self> {
        if nsteps == 0 {
            return Err(DpcError::Config(format!("{name}: horizon must be positive")));
        }
        let x0 = output_key("x0", name);
        let reg = output_key("reg_error", name);
        let width = dims.get(key).copied().ok_or_else(|| {
            DpcError::Config(format!("{name}: no declared dimension for key `{key}`"))
        })?;

        let interface = Interface::new(name, vec![key.to_string()], vec![x0.clone(), reg.clone()])?
            .with_dims(dims)
            .with_width(&x0, width)
            .with_width(&reg, 1);

        Ok(Self { interface, nsteps })
    }
}

impl<B: Backend> Component<B> for FullyObservable {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let mut inputs = self.interface.inputs(data)?;
        let y = inputs.remove(0);
        let [time, batch, width] = y.dims();
        if time < self.nsteps {
            return Err(DpcError::Contract {
                owner: self.interface.name().to_string(),
                message: format!("sequence has {time} steps, needs at least {}", self.nsteps),
            });
        }
        let device = y.device();
        let x0 = y.slice([self.nsteps - 1..self.nsteps, 0..batch, 0..width]);

        self.interface
            .outputs(data.name(), vec![x0, constant(0.0, &device)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::array_from_tensor;
    use burn::backend::NdArray;
    use burn::tensor::{Data, Shape};

    type TestBackend = NdArray;

    fn dims() -> DataDims {
        DataDims::from([("Yp".to_string(), 2), ("Up".to_string(), 1)])
    }

    fn batch() -> DataDict<TestBackend> {
        DataDict::new("nstep_train")
            .with("Yp", Tensor::ones([4, 3, 2]))
            .unwrap()
            .with("Up", Tensor::ones([4, 3, 1]))
            .unwrap()
    }

    #[test]
    fn estimator_outputs_state() {
        let estim: TimeDelayEstimator<TestBackend> =
            TimeDelayEstimatorConfig::new("estim".into(), 5)
                .with_input_keys(vec!["Yp".into(), "Up".into()])
                .with_nsteps(4)
                .with_window_size(2)
                .with_hsizes(vec![8])
                .init(&dims())
                .unwrap();

        let out = estim.forward(&batch()).unwrap();
        assert_eq!(out.get("x0_estim").unwrap().dims(), [1, 3, 5]);
        assert_eq!(out.get("reg_error_estim").unwrap().dims(), [1, 1, 1]);
    }

    #[test]
    fn window_longer_than_horizon_is_rejected() {
        let result = TimeDelayEstimatorConfig::new("estim".into(), 5)
            .with_nsteps(2)
            .with_window_size(3)
            .init::<TestBackend>(&dims());

        assert!(matches!(result, Err(DpcError::Config(_))));
    }

    #[test]
    fn undeclared_input_is_a_config_error() {
        let result = TimeDelayEstimatorConfig::new("estim".into(), 5)
            .with_input_keys(vec!["Dp".into()])
            .init::<TestBackend>(&dims());

        assert!(matches!(result, Err(DpcError::Config(_))));
    }

    #[test]
    fn fully_observable_takes_last_past_step() {
        let estim = FullyObservable::new("fo", "Yp", 4, &dims()).unwrap();
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let y = Tensor::from_data(Data::new(values, Shape::new([4, 3, 2])).convert());
        let data = DataDict::new("nstep_train").with("Yp", y).unwrap();

        let out = Component::<TestBackend>::forward(&estim, &data).unwrap();
        let x0 = array_from_tensor(out.get("x0_fo").unwrap().clone());

        assert_eq!(x0.dim(), (1, 3, 2));
        assert_eq!(x0[[0, 0, 0]], 18.0);
    }
}
