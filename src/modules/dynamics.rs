use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use super::activation::Activation;
use super::blocks::{Mlp, MlpConfig};
use super::component::{output_key, static_features, Component, DataDims, Interface};
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::utils::constant;

/// Learnable maps of a block state-space model:
/// `x[t+1] = fx(x[t]) + fu(u[t]) + fd(d[t])`, `y[t] = fy(x[t+1])`.
#[derive(Module, Debug)]
pub struct SsmMaps<B: Backend> {
    fx: Mlp<B>,
    fu: Linear<B>,
    fd: Option<Linear<B>>,
    fy: Linear<B>,
}

#[derive(Config, Debug)]
pub struct BlockSsmConfig {
    name: String,
    nx: usize,
    nu: usize,
    ny: usize,

    /// Disturbance width; 0 disables the disturbance input.
    #[config(default = 0)]
    nd: usize,

    #[config(default = "String::from(\"x0\")")]
    state_key: String,

    #[config(default = "String::from(\"Uf\")")]
    input_key: String,

    #[config(default = "String::from(\"Df\")")]
    disturbance_key: String,

    /// Hidden sizes of the state transition map; empty keeps it linear.
    #[config(default = "vec![]")]
    hsizes: Vec<usize>,

    #[config(default = false)]
    bias: bool,

    #[config(default = "Activation::Relu")]
    activation: Activation,
}

impl BlockSsmConfig {
    pub fn init<B: Backend>(&self, dims: &DataDims) -> DpcResult<BlockSsm<B>> {
        let mut ports = vec![
            (self.state_key.clone(), self.nx),
            (self.input_key.clone(), self.nu),
        ];
        if self.nd > 0 {
            ports.push((self.disturbance_key.clone(), self.nd));
        }
        for (key, expected) in &ports {
            if let Some(&actual) = dims.get(key) {
                if actual != *expected {
                    return Err(DpcError::Shape {
                        owner: self.name.clone(),
                        key: key.clone(),
                        expected: *expected,
                        actual,
                    });
                }
            }
        }

        let outputs = [
            (output_key("X_pred", &self.name), self.nx),
            (output_key("Y_pred", &self.name), self.ny),
            (output_key("fU", &self.name), self.nx),
            (output_key("reg_error", &self.name), 1),
        ];
        let mut interface = Interface::new(
            self.name.clone(),
            ports.iter().map(|(key, _)| key.clone()).collect(),
            outputs.iter().map(|(key, _)| key.clone()).collect(),
        )?;
        for (key, width) in ports.iter().chain(outputs.iter()) {
            interface = interface.with_width(key, *width);
        }

        let linear = |d_input, d_output| {
            LinearConfig::new(d_input, d_output)
                .with_bias(self.bias)
                .init()
        };
        let maps = SsmMaps {
            fx: MlpConfig::new(self.nx, self.nx)
                .with_hsizes(self.hsizes.clone())
                .with_bias(self.bias)
                .init(),
            fu: linear(self.nu, self.nx),
            fd: (self.nd > 0).then(|| linear(self.nd, self.nx)),
            fy: linear(self.nx, self.ny),
        };

        Ok(BlockSsm {
            interface,
            maps,
            activation: self.activation,
        })
    }
}

/// Rolls a block state-space model forward over the horizon of its input
/// sequence, starting from the estimated initial state.
pub struct BlockSsm<B: Backend> {
    interface: Interface,
    maps: SsmMaps<B>,
    activation: Activation,
}

impl<B: Backend> BlockSsm<B> {
    pub fn maps(&self) -> &SsmMaps<B> {
        &self.maps
    }
}

fn step<B: Backend>(x: Tensor<B, 3>, t: usize) -> Tensor<B, 2> {
    let [_, batch, width] = x.dims();
    x.slice([t..t + 1, 0..batch, 0..width])
        .reshape([batch, width])
}

fn stack<B: Backend>(steps: Vec<Tensor<B, 2>>) -> Tensor<B, 3> {
    let steps = steps
        .into_iter()
        .map(|x| {
            let [batch, width] = x.dims();
            x.reshape([1, batch, width])
        })
        .collect();
    Tensor::cat(steps, 0)
}

impl<B: Backend> Component<B> for BlockSsm<B> {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let name = self.interface.name();
        let mut inputs = self.interface.inputs(data)?.into_iter();
        let (x0, u, d) = match (inputs.next(), inputs.next(), inputs.next()) {
            (Some(x0), Some(u), d) => (x0, u, d),
            _ => {
                return Err(DpcError::Contract {
                    owner: name.to_string(),
                    message: "state and input keys are required".to_string(),
                })
            }
        };

        let mut x = static_features(name, &self.interface.input_keys()[0], x0)?;
        let nsteps = u.dims()[0];
        if let Some(d) = &d {
            if d.dims()[0] < nsteps {
                return Err(DpcError::Contract {
                    owner: name.to_string(),
                    message: format!(
                        "disturbance has {} steps, input has {nsteps}",
                        d.dims()[0]
                    ),
                });
            }
        }
        debug!(component = name, nsteps, "rolling out state-space model");

        let device = x.device();
        let (mut xs, mut ys, mut fus) = (vec![], vec![], vec![]);
        for t in 0..nsteps {
            let fu = self.maps.fu.forward(step(u.clone(), t));
            let mut next = self.maps.fx.forward(x, self.activation) + fu.clone();
            if let (Some(fd), Some(d)) = (&self.maps.fd, &d) {
                next = next + fd.forward(step(d.clone(), t));
            }
            x = next;
            ys.push(self.maps.fy.forward(x.clone()));
            xs.push(x.clone());
            fus.push(fu);
        }

        self.interface.outputs(
            data.name(),
            vec![stack(xs), stack(ys), stack(fus), constant(0.0, &device)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn batch() -> DataDict<TestBackend> {
        DataDict::new("nstep_train")
            .with("x0", Tensor::ones([1, 3, 4]))
            .unwrap()
            .with("Uf", Tensor::ones([5, 3, 2]))
            .unwrap()
            .with("Df", Tensor::ones([5, 3, 1]))
            .unwrap()
    }

    #[test]
    fn rollout_covers_input_horizon() {
        let model: BlockSsm<TestBackend> = BlockSsmConfig::new("dynamics".into(), 4, 2, 1)
            .with_nd(1)
            .with_hsizes(vec![8])
            .init(&DataDims::new())
            .unwrap();

        let out = model.forward(&batch()).unwrap();
        assert_eq!(out.get("X_pred_dynamics").unwrap().dims(), [5, 3, 4]);
        assert_eq!(out.get("Y_pred_dynamics").unwrap().dims(), [5, 3, 1]);
        assert_eq!(out.get("fU_dynamics").unwrap().dims(), [5, 3, 4]);
    }

    #[test]
    fn declared_width_must_match_config() {
        let dims = DataDims::from([("Uf".to_string(), 3)]);
        let result = BlockSsmConfig::new("dynamics".into(), 4, 2, 1).init::<TestBackend>(&dims);

        assert!(matches!(result, Err(DpcError::Shape { expected: 2, actual: 3, .. })));
    }
}
