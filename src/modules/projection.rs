use burn::tensor::{backend::Backend, Data, Tensor};

use super::component::{output_key, Component, DataDims, Interface};
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};

/// Rounds each input to the nearest integer, publishing `{key}_{name}`.
///
/// The forward value is rounded while the gradient passes straight through,
/// so mixed-integer policies stay trainable.
pub struct IntegerProjection {
    interface: Interface,
}

impl IntegerProjection {
    pub fn new(name: &str, keys: &[&str], dims: &DataDims) -> DpcResult<Self> {
        if keys.is_empty() {
            return Err(DpcError::Config(format!("{name}: nothing to project")));
        }
        let outputs: Vec<String> = keys.iter().map(|key| output_key(key, name)).collect();
        let mut interface = Interface::new(
            name,
            keys.iter().map(|key| key.to_string()).collect(),
            outputs.clone(),
        )?
        .with_dims(dims);
        for (key, output) in keys.iter().zip(outputs.iter()) {
            if let Some(&width) = dims.get(*key) {
                interface = interface.with_width(output, width);
            }
        }
        Ok(Self { interface })
    }
}

fn round_straight_through<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let data = x.to_data().convert::<f32>();
    let rounded = Data::new(
        data.value.iter().map(|v| v.round()).collect(),
        data.shape,
    );
    let rounded: Tensor<B, 3> = Tensor::from_data_device(rounded.convert(), &x.device());

    x.clone() + (rounded - x.detach())
}

impl<B: Backend> Component<B> for IntegerProjection {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let projected = self
            .interface
            .inputs(data)?
            .into_iter()
            .map(round_straight_through)
            .collect();
        self.interface.outputs(data.name(), projected)
    }
}
