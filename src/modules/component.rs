use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use burn::tensor::{backend::Backend, Tensor};

use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::utils::constant;

/// Declared feature width (last axis) of each dictionary key.
pub type DataDims = BTreeMap<String, usize>;

/// Key under which a component publishes `base`, e.g. `x0_estim`.
pub fn output_key(base: &str, name: &str) -> String {
    format!("{base}_{name}")
}

/// A named mapping from dictionary entries to new dictionary entries.
///
/// `forward` must return exactly [`Component::output_keys`]; the
/// [`crate::Problem`] merges them into the flowing dictionary and rejects any
/// key that already exists.
pub trait Component<B: Backend> {
    fn interface(&self) -> &Interface;

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>>;

    /// Regularization penalty of the learnable maps, `[1, 1, 1]`.
    fn reg_error(&self) -> Tensor<B, 3> {
        constant(0.0, &Default::default())
    }

    fn name(&self) -> &str {
        self.interface().name()
    }

    fn input_keys(&self) -> &[String] {
        self.interface().input_keys()
    }

    fn output_keys(&self) -> &[String] {
        self.interface().output_keys()
    }
}

/// Ordered input ports, output ports and declared widths of a component.
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    name: String,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    dims: DataDims,
}

impl Interface {
    pub fn new(
        name: impl Into<String>,
        input_keys: Vec<String>,
        output_keys: Vec<String>,
    ) -> DpcResult<Self> {
        let name = name.into();
        let mut seen = BTreeSet::new();
        if let Some(key) = output_keys.iter().find(|key| !seen.insert(key.as_str())) {
            return Err(DpcError::DuplicateName(key.clone()));
        }
        Ok(Self {
            name,
            input_keys,
            output_keys,
            dims: DataDims::new(),
        })
    }

    /// Declare widths. Widths of keys that are neither inputs nor outputs are ignored.
    pub fn with_dims(mut self, dims: &DataDims) -> Self {
        for key in self.input_keys.iter().chain(self.output_keys.iter()) {
            if let Some(width) = dims.get(key) {
                self.dims.insert(key.clone(), *width);
            }
        }
        self
    }

    pub fn with_width(mut self, key: &str, width: usize) -> Self {
        self.dims.insert(key.to_string(), width);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    pub fn dims(&self) -> &DataDims {
        &self.dims
    }

    /// Declared width of `key`; a missing declaration is a configuration error.
    pub fn width(&self, key: &str) -> DpcResult<usize> {
        self.dims.get(key).copied().ok_or_else(|| {
            DpcError::Config(format!(
                "{}: no declared dimension for key `{key}`",
                self.name
            ))
        })
    }

    fn check_width<B: Backend>(&self, key: &str, tensor: &Tensor<B, 3>) -> DpcResult<()> {
        match self.dims.get(key) {
            Some(&expected) if tensor.dims()[2] != expected => Err(DpcError::Shape {
                owner: self.name.clone(),
                key: key.to_string(),
                expected,
                actual: tensor.dims()[2],
            }),
            _ => Ok(()),
        }
    }

    /// Fetch every input key in declared order, checking declared widths.
    pub fn inputs<B: Backend>(&self, data: &DataDict<B>) -> DpcResult<Vec<Tensor<B, 3>>> {
        self.input_keys
            .iter()
            .map(|key| {
                let tensor = data.require(&self.name, key)?;
                self.check_width(key, &tensor)?;
                Ok(tensor)
            })
            .collect()
    }

    /// Every input key must be present with its declared width.
    pub fn check_inputs<B: Backend>(&self, data: &DataDict<B>) -> DpcResult<()> {
        for key in self.input_keys.iter() {
            let tensor = data
                .get(key)
                .ok_or_else(|| DpcError::missing_key(&self.name, key))?;
            self.check_width(key, tensor)?;
        }
        Ok(())
    }

    /// Pair `tensors` with the output keys into a dictionary tagged `batch_name`.
    pub fn outputs<B: Backend>(
        &self,
        batch_name: &str,
        tensors: Vec<Tensor<B, 3>>,
    ) -> DpcResult<DataDict<B>> {
        if tensors.len() != self.output_keys.len() {
            return Err(DpcError::Contract {
                owner: self.name.clone(),
                message: format!(
                    "produced {} tensors for {} declared outputs",
                    tensors.len(),
                    self.output_keys.len()
                ),
            });
        }
        let mut out = DataDict::new(batch_name);
        for (key, tensor) in self.output_keys.iter().zip(tensors) {
            self.check_width(key, &tensor)?;
            out.insert(&self.name, key.clone(), tensor)?;
        }
        Ok(out)
    }

    /// An output dictionary must hold exactly the declared output keys, each
    /// with its declared width.
    pub fn check_outputs<B: Backend>(&self, out: &DataDict<B>) -> DpcResult<()> {
        if let Some(key) = self.output_keys.iter().find(|key| !out.contains_key(key)) {
            return Err(DpcError::missing_key(&self.name, key));
        }
        if let Some(key) = out.keys().find(|key| !self.output_keys.contains(key)) {
            return Err(DpcError::Contract {
                owner: self.name.clone(),
                message: format!("produced undeclared key `{key}`"),
            });
        }
        for (key, tensor) in out.iter() {
            self.check_width(key, tensor)?;
        }
        Ok(())
    }
}

/// Flatten time steps `steps` of a `(time, batch, feature)` sequence into
/// `(batch, steps * feature)` features.
pub fn window_features<B: Backend>(
    owner: &str,
    key: &str,
    x: Tensor<B, 3>,
    steps: Range<usize>,
) -> DpcResult<Tensor<B, 2>> {
    let [time, batch, width] = x.dims();
    if steps.end > time {
        return Err(DpcError::Contract {
            owner: owner.to_string(),
            message: format!(
                "sequence `{key}` has {time} steps, needs at least {}",
                steps.end
            ),
        });
    }
    let window = steps.len();
    Ok(x.slice([steps, 0..batch, 0..width])
        .swap_dims(0, 1)
        .reshape([batch, window * width]))
}

/// Drop the singleton time axis of a static `(1, batch, feature)` value.
pub fn static_features<B: Backend>(owner: &str, key: &str, x: Tensor<B, 3>) -> DpcResult<Tensor<B, 2>> {
    let [time, batch, width] = x.dims();
    if time != 1 {
        return Err(DpcError::Contract {
            owner: owner.to_string(),
            message: format!("static input `{key}` has {time} time steps, expected 1"),
        });
    }
    Ok(x.reshape([batch, width]))
}

type ComponentFn<B> = Box<dyn Fn(&[Tensor<B, 3>]) -> Vec<Tensor<B, 3>>>;

/// Component backed by a closure over its input tensors, in declared order.
pub struct FnComponent<B: Backend> {
    interface: Interface,
    func: ComponentFn<B>,
}

impl<B: Backend> FnComponent<B> {
    pub fn new(
        name: &str,
        input_keys: &[&str],
        output_keys: &[&str],
        func: impl Fn(&[Tensor<B, 3>]) -> Vec<Tensor<B, 3>> + 'static,
    ) -> DpcResult<Self> {
        let interface = Interface::new(
            name,
            input_keys.iter().map(|k| k.to_string()).collect(),
            output_keys.iter().map(|k| k.to_string()).collect(),
        )?;
        Ok(Self {
            interface,
            func: Box::new(func),
        })
    }

    pub fn with_dims(mut self, dims: &DataDims) -> Self {
        self.interface = self.interface.with_dims(dims);
        self
    }
}

impl<B: Backend> Component<B> for FnComponent<B> {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn forward(&self, data: &DataDict<B>) -> DpcResult<DataDict<B>> {
        let inputs = self.interface.inputs(data)?;
        self.interface.outputs(data.name(), (self.func)(&inputs))
    }
}
