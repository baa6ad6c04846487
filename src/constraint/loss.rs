use std::collections::BTreeMap;
use std::fmt;

use burn::tensor::{backend::Backend, Tensor};

use super::expr::{Expr, Reduction};
use super::variable::Variable;
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::utils::{as_scalar, mse_loss};

/// A named scalar term of a problem's loss.
pub trait LossTerm<B: Backend> {
    fn name(&self) -> &str;

    fn weight(&self) -> f32;

    /// Dictionary keys read by [`LossTerm::evaluate`], sorted.
    fn input_keys(&self) -> Vec<String>;

    /// Unweighted value, shaped `[1, 1, 1]`.
    fn evaluate(&self, data: &DataDict<B>) -> DpcResult<Tensor<B, 3>>;

    /// Symbolic form of the value, when there is one. Later terms may take
    /// gradients through it.
    fn expression(&self) -> Option<Expr> {
        None
    }

    /// Resolve references to the earlier terms in `defs`.
    fn link(&mut self, _defs: &BTreeMap<String, Expr>) -> DpcResult<()> {
        Ok(())
    }
}

/// Reshape a term value to `[1, 1, 1]`, rejecting anything but a single element.
pub(crate) fn scalar_term<B: Backend>(name: &str, x: Tensor<B, 3>) -> DpcResult<Tensor<B, 3>> {
    let dims = x.dims();
    if dims.iter().product::<usize>() != 1 {
        return Err(DpcError::Contract {
            owner: name.to_string(),
            message: format!("loss value must be a scalar, got shape {dims:?}"),
        });
    }
    Ok(as_scalar(x))
}

/// `weight * mean(expr)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Objective {
    variable: Variable,
    weight: f32,
    name: String,
    value: Expr,
}

impl Objective {
    pub fn new(variable: Variable, weight: f32, name: impl Into<String>) -> Self {
        let value = Expr::reduce(Reduction::Mean, variable.expr().clone());
        Self {
            variable,
            weight,
            name: name.into(),
            value,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} * mean({})", self.name, self.weight, self.variable)
    }
}

impl<B: Backend> LossTerm<B> for Objective {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn input_keys(&self) -> Vec<String> {
        self.value.keys().into_iter().collect()
    }

    fn evaluate(&self, data: &DataDict<B>) -> DpcResult<Tensor<B, 3>> {
        scalar_term(&self.name, self.value.eval(data, &self.name)?)
    }

    fn expression(&self) -> Option<Expr> {
        Some(self.value.clone())
    }

    fn link(&mut self, defs: &BTreeMap<String, Expr>) -> DpcResult<()> {
        self.value = self.value.expand_grads_with(defs)?;
        Ok(())
    }
}

type Reducer<B> = Box<dyn Fn(&[Tensor<B, 3>]) -> Tensor<B, 3>>;

/// A term computed by a closure over the tensors of `keys`, in order.
pub struct Loss<B: Backend> {
    keys: Vec<String>,
    func: Reducer<B>,
    weight: f32,
    name: String,
}

impl<B: Backend> Loss<B> {
    pub fn new(
        keys: &[&str],
        func: impl Fn(&[Tensor<B, 3>]) -> Tensor<B, 3> + 'static,
        weight: f32,
        name: impl Into<String>,
    ) -> Self {
        Self {
            keys: keys.iter().map(|key| key.to_string()).collect(),
            func: Box::new(func),
            weight,
            name: name.into(),
        }
    }

    /// Mean squared error between two keys.
    pub fn mse(a: &str, b: &str, weight: f32, name: impl Into<String>) -> Self {
        Self::new(
            &[a, b],
            |x| mse_loss(x[0].clone(), x[1].clone()),
            weight,
            name,
        )
    }

    /// Sum of the scalar regularization errors published under `keys`.
    pub fn regularization(keys: &[&str], weight: f32, name: impl Into<String>) -> Self {
        Self::new(
            keys,
            |x| {
                x.iter()
                    .map(|reg| as_scalar(reg.clone().mean()))
                    .reduce(|a, b| a + b)
                    .unwrap_or_else(|| Tensor::zeros([1, 1, 1]))
            },
            weight,
            name,
        )
    }
}

impl<B: Backend> fmt::Debug for Loss<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loss")
            .field("keys", &self.keys)
            .field("weight", &self.weight)
            .field("name", &self.name)
            .finish()
    }
}

impl<B: Backend> LossTerm<B> for Loss<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn input_keys(&self) -> Vec<String> {
        let mut keys = self.keys.clone();
        keys.sort();
        keys.dedup();
        keys
    }

    fn evaluate(&self, data: &DataDict<B>) -> DpcResult<Tensor<B, 3>> {
        let inputs = self
            .keys
            .iter()
            .map(|key| data.require(&self.name, key))
            .collect::<DpcResult<Vec<_>>>()?;
        scalar_term(&self.name, (self.func)(&inputs))
    }
}
