use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Range, Sub};

use burn::tensor::{backend::Backend, Tensor};

use super::expr::{BinaryOp, Expr, Reduction, UnaryOp};
use super::loss::Objective;
use super::penalty::{Comparison, Constraint};
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};

/// Symbolic handle on a dictionary key, or an expression built from several.
///
/// ```ignore
/// let x = Variable::from("X_pred_dynamics");
/// let bound = x.clone().lower_equal(1.0)?;
/// let effort = (0.1 * Variable::from("U_pred_policy").pow(2.0)).minimize(1.0, "effort");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    expr: Expr,
    display_name: Option<String>,
}

impl Variable {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            display_name: None,
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::new(Expr::Key(key.into()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the rendered expression.
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.expr.to_string())
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    pub fn keys(&self) -> Vec<String> {
        self.expr.keys().into_iter().collect()
    }

    fn map(self, f: impl FnOnce(Expr) -> Expr) -> Self {
        Self::new(f(self.expr))
    }

    pub fn pow(self, p: f32) -> Self {
        self.map(|e| Expr::powf(e, p))
    }

    pub fn relu(self) -> Self {
        self.map(|e| Expr::unary(UnaryOp::Relu, e))
    }

    pub fn abs(self) -> Self {
        self.map(|e| Expr::unary(UnaryOp::Abs, e))
    }

    pub fn log(self) -> Self {
        self.map(|e| Expr::unary(UnaryOp::Log, e))
    }

    pub fn exp(self) -> Self {
        self.map(|e| Expr::unary(UnaryOp::Exp, e))
    }

    pub fn mean(self) -> Self {
        self.map(|e| Expr::reduce(Reduction::Mean, e))
    }

    pub fn sum(self) -> Self {
        self.map(|e| Expr::reduce(Reduction::Sum, e))
    }

    pub fn slice(self, axis: usize, range: Range<usize>) -> Self {
        self.map(|e| Expr::Slice {
            expr: Box::new(e),
            axis,
            range,
        })
    }

    /// Columns `range` of the feature axis.
    pub fn feature(self, range: Range<usize>) -> Self {
        self.slice(2, range)
    }

    /// Steps `range` of the time axis.
    pub fn time(self, range: Range<usize>) -> Self {
        self.slice(0, range)
    }

    /// Derivative of `self` with respect to the dictionary key behind `wrt`.
    ///
    /// `self` may reference earlier loss terms by name; those are inlined
    /// when the owning problem is built.
    pub fn grad(self, wrt: &Variable) -> DpcResult<Variable> {
        match &wrt.expr {
            Expr::Key(key) => Ok(self.map(|e| Expr::Grad {
                of: Box::new(e),
                wrt: key.clone(),
            })),
            other => Err(DpcError::Expression(format!(
                "gradients are taken with respect to a key, not `{other}`"
            ))),
        }
    }

    pub fn evaluate<B: Backend>(&self, data: &DataDict<B>) -> DpcResult<Tensor<B, 3>> {
        self.expr.eval(data, &self.name())
    }

    /// Objective `weight * mean(self)`, stored under `name`.
    pub fn minimize(self, weight: f32, name: impl Into<String>) -> Objective {
        Objective::new(self, weight, name)
    }

    pub fn equal(self, rhs: impl Into<Variable>) -> DpcResult<Constraint> {
        Constraint::new(self, rhs.into(), Comparison::Equal)
    }

    pub fn lower_equal(self, rhs: impl Into<Variable>) -> DpcResult<Constraint> {
        Constraint::new(self, rhs.into(), Comparison::LowerEqual)
    }

    pub fn greater_equal(self, rhs: impl Into<Variable>) -> DpcResult<Constraint> {
        Constraint::new(self, rhs.into(), Comparison::GreaterEqual)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.expr),
        }
    }
}

impl From<f32> for Variable {
    fn from(value: f32) -> Self {
        Self::new(Expr::Const(value))
    }
}

impl From<&str> for Variable {
    fn from(key: &str) -> Self {
        Self::key(key)
    }
}

impl From<String> for Variable {
    fn from(key: String) -> Self {
        Self::key(key)
    }
}

impl From<Expr> for Variable {
    fn from(expr: Expr) -> Self {
        Self::new(expr)
    }
}

fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
    match op {
        BinaryOp::Add => Expr::add(a, b),
        BinaryOp::Sub => Expr::sub(a, b),
        BinaryOp::Mul => Expr::mul(a, b),
        BinaryOp::Div => Expr::div(a, b),
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Variable> for Variable {
            type Output = Variable;

            fn $method(self, rhs: Variable) -> Variable {
                Variable::new(binary($op, self.expr, rhs.expr))
            }
        }

        impl $trait<f32> for Variable {
            type Output = Variable;

            fn $method(self, rhs: f32) -> Variable {
                Variable::new(binary($op, self.expr, Expr::Const(rhs)))
            }
        }

        impl $trait<Variable> for f32 {
            type Output = Variable;

            fn $method(self, rhs: Variable) -> Variable {
                Variable::new(binary($op, Expr::Const(self), rhs.expr))
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl Neg for Variable {
    type Output = Variable;

    fn neg(self) -> Variable {
        self.map(Expr::neg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Data, Shape};

    type TestBackend = NdArray;

    fn data() -> DataDict<TestBackend> {
        let x = Data::new(vec![1.0, 2.0, 3.0, 4.0], Shape::new([1, 2, 2]));
        DataDict::new("train")
            .with("x", Tensor::from_data(x.convert()))
            .unwrap()
    }

    #[test]
    fn algebra_builds_expressions() {
        let x = Variable::from("x");
        let y = 2.0 * x.clone() - 1.0;

        assert_eq!(y.to_string(), "((2 * x) - 1)");
        assert_eq!(y.keys(), vec!["x"]);

        let values = y.evaluate(&data()).unwrap().into_data().convert::<f32>().value;
        assert_eq!(values, vec![1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn feature_slices_and_reductions() {
        let x = Variable::from("x");
        let second = x.feature(1..2).sum();

        let values = second.evaluate(&data()).unwrap().into_data().convert::<f32>().value;
        assert_eq!(values, vec![6.0]);
    }

    #[test]
    fn grad_requires_a_key() {
        let x = Variable::from("x");
        assert!(x.clone().pow(2.0).grad(&(x.clone() * 2.0)).is_err());

        let dx = x.clone().pow(2.0).grad(&x).unwrap();
        let values = dx.evaluate(&data()).unwrap().into_data().convert::<f32>().value;
        assert_eq!(values, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn display_name_overrides_expression() {
        let x = (Variable::from("x") * 3.0).with_name("scaled");
        assert_eq!(x.name(), "scaled");
        assert_eq!(x.to_string(), "scaled");
    }
}
