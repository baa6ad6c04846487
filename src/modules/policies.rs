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
pub struct MlpPolicyConfig {
    name: String,
    /// Control width per step.
    nu: usize,

    #[config(default = 1)]
    nsteps: usize,

    /// Inputs without a time axis, e.g. the initial state or sampled parameters.
    #[config(default = "vec![String::from(\"x0\")]")]
    static_keys: Vec<String>,

    /// Sequences (references, disturbances) read over the whole horizon.
    #[config(default = "vec![]")]
    sequence_keys: Vec<String>,

    #[config(default = "vec![64]")]
    hsizes: Vec<usize>,

    #[config(default = false)]
    bias: bool,

    #[config(default = "Activation::Relu")]
    activation: Activation,
}

impl MlpPolicyConfig {
    pub fn init<B: Backend>(&self, dims: &DataDims) -> DpcResult<MlpPolicy<B>> {
        if self.nsteps == 0 {
            return Err(DpcError::Config(format!("{}: horizon must be positive", self.name)));
        }
        if self.static_keys.is_empty() && self.sequence_keys.is_empty() {
            return Err(DpcError::Config(format!("{}: policy has no inputs", self.name)));
        }

        let u = output_key("U_pred", &self.name);
        let reg = output_key("reg_error", &self.name);
        let interface = Interface::new(
            self.name.clone(),
            self.static_keys
                .iter()
                .chain(self.sequence_keys.iter())
                .cloned()
                .collect(),
            vec![u.clone(), reg.clone()],
        )?
        .with_dims(dims)
        .with_width(&u, self.nu)
        .with_width(&reg, 1);

        let static_width: usize = self
            .static_keys
            .iter()
            .map(|key| interface.width(key))
            .sum::<DpcResult<usize>>()?;
        let sequence_width: usize = self
            .sequence_keys
            .iter()
            .map(|key| interface.width(key))
            .sum::<DpcResult<usize>>()?;

        let net = MlpConfig::new(
            static_width + self.nsteps * sequence_width,
            self.nsteps * self.nu,
        )
        .with_hsizes(self.hsizes.clone())
        .with_bias(self.bias)
        .init();

        Ok(MlpPolicy {
            interface,
            net,
            nsteps: self.nsteps,
            nu: self.nu,
            num_static: self.static_keys.len(),
            activation: self.activation,
        })
    }
}

/// Maps static inputs and horizon-long sequences to a control sequence
/// `U_pred_{name}` of shape `(nsteps, batch, nu)`.
pub struct MlpPolicy<B: Backend> {
    interface: Interface,
    net: Mlp<B>,
    nsteps: usize,
    nu: usize,
    num_static: usize,
    activation: Activation,
}

impl<B: Backend> MlpPolicy<B> {
    pub fn net(&self) -> &Mlp<B> {
        &self.net
    }
}

impl<B: Backend> Component<B> for MlpPolicy<B> {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let name = self.interface.name();
        let features = self
            .interface
            .input_keys()
            .iter()
            .zip(self.interface.inputs(data)?)
            .enumerate()
            .map(|(i, (key, x))| {
                if i < self.num_static {
                    static_features(name, key, x)
                } else {
                    window_features(name, key, x, 0..self.nsteps)
                }
            })
            .collect::<DpcResult<Vec<_>>>()?;
        let features = Tensor::cat(features, 1);
        let [batch, _] = features.dims();
        let device = features.device();

        let u = self
            .net
            .forward(features, self.activation)
            .reshape([batch, self.nsteps, self.nu])
            .swap_dims(0, 1);

        self.interface
            .outputs(data.name(), vec![u, constant(0.0, &device)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn policy_emits_horizon_of_controls() {
        let dims = DataDims::from([("x0".to_string(), 3), ("Rf".to_string(), 1)]);
        let policy: MlpPolicy<TestBackend> = MlpPolicyConfig::new("policy".into(), 2)
            .with_nsteps(4)
            .with_sequence_keys(vec!["Rf".into()])
            .with_hsizes(vec![16, 16])
            .init(&dims)
            .unwrap();

        let data = DataDict::new("nstep_train")
            .with("x0", Tensor::ones([1, 5, 3]))
            .unwrap()
            .with("Rf", Tensor::ones([4, 5, 1]))
            .unwrap();
        let out = policy.forward(&data).unwrap();

        assert_eq!(out.get("U_pred_policy").unwrap().dims(), [4, 5, 2]);
    }

    #[test]
    fn policy_needs_inputs() {
        let result = MlpPolicyConfig::new("policy".into(), 2)
            .with_static_keys(vec![])
            .init::<TestBackend>(&DataDims::new());

        assert!(matches!(result, Err(DpcError::Config(_))));
    }
}
