//! Expression trees over dictionary keys.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use burn::tensor::{activation, backend::Backend, Tensor};

use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::utils::{as_scalar, constant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Relu,
    Abs,
    Log,
    Exp,
    /// Heaviside step, `1` where the argument is positive.
    Step,
    Sign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
}

/// A symbolic computation over named dictionary tensors.
///
/// Every node evaluates to a rank 3 tensor. Binary nodes broadcast axes of
/// width one, and reductions produce `[1, 1, 1]` scalars.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Key(String),
    Const(f32),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Powf(Box<Expr>, f32),
    Slice {
        expr: Box<Expr>,
        axis: usize,
        range: Range<usize>,
    },
    Reduce(Reduction, Box<Expr>),
    /// Zeros shaped like `like`, with `expr` written over `range` along `axis`.
    Embed {
        expr: Box<Expr>,
        like: Box<Expr>,
        axis: usize,
        range: Range<usize>,
    },
    /// `expr` brought to the shape of `like`. Axes where `like` has width one
    /// are summed, axes where `expr` has width one are repeated.
    Fit { expr: Box<Expr>, like: Box<Expr> },
    OnesLike(Box<Expr>),
    /// Element count of the argument, as a scalar.
    Numel(Box<Expr>),
    /// Derivative of `of` with respect to the key `wrt`.
    Grad { of: Box<Expr>, wrt: String },
}

impl Expr {
    pub fn key(name: impl Into<String>) -> Self {
        Expr::Key(name.into())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(v) if *v == 0.0)
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(v) if *v == 1.0)
    }

    pub fn unary(op: UnaryOp, a: Expr) -> Self {
        match (op, a) {
            (UnaryOp::Neg, Expr::Const(v)) => Expr::Const(-v),
            (UnaryOp::Neg, Expr::Unary(UnaryOp::Neg, inner)) => *inner,
            (op, a) => Expr::Unary(op, Box::new(a)),
        }
    }

    pub fn neg(a: Expr) -> Self {
        Expr::unary(UnaryOp::Neg, a)
    }

    pub fn add(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x + y),
            (a, b) if a.is_zero() => b,
            (a, b) if b.is_zero() => a,
            (a, b) => Expr::Binary(BinaryOp::Add, Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x - y),
            (a, b) if b.is_zero() => a,
            (a, b) if a.is_zero() => Expr::neg(b),
            (a, b) => Expr::Binary(BinaryOp::Sub, Box::new(a), Box::new(b)),
        }
    }

    /// Multiplication folds constants and unit factors only, so `x * 0`
    /// keeps reading `x` and still propagates NaN.
    pub fn mul(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x * y),
            (a, b) if a.is_one() => b,
            (a, b) if b.is_one() => a,
            (a, b) => Expr::Binary(BinaryOp::Mul, Box::new(a), Box::new(b)),
        }
    }

    pub fn div(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x / y),
            (a, b) if b.is_one() => a,
            (a, b) => Expr::Binary(BinaryOp::Div, Box::new(a), Box::new(b)),
        }
    }

    pub fn powf(a: Expr, p: f32) -> Self {
        match a {
            Expr::Const(v) => Expr::Const(v.powf(p)),
            a if p == 1.0 => a,
            a => Expr::Powf(Box::new(a), p),
        }
    }

    pub fn reduce(op: Reduction, a: Expr) -> Self {
        Expr::Reduce(op, Box::new(a))
    }

    /// Every dictionary key the expression reads, sorted.
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut BTreeSet<String>) {
        match self {
            Expr::Key(key) => {
                keys.insert(key.clone());
            }
            Expr::Const(_) => {}
            Expr::Unary(_, a)
            | Expr::Powf(a, _)
            | Expr::Reduce(_, a)
            | Expr::OnesLike(a)
            | Expr::Numel(a) => a.collect_keys(keys),
            Expr::Slice { expr, .. } => expr.collect_keys(keys),
            Expr::Binary(_, a, b)
            | Expr::Embed { expr: a, like: b, .. }
            | Expr::Fit { expr: a, like: b } => {
                a.collect_keys(keys);
                b.collect_keys(keys);
            }
            Expr::Grad { of, wrt } => {
                of.collect_keys(keys);
                keys.insert(wrt.clone());
            }
        }
    }

    pub fn references(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    /// Evaluate against `data`; `owner` names the term in errors.
    pub fn eval<B: Backend>(&self, data: &DataDict<B>, owner: &str) -> DpcResult<Tensor<B, 3>> {
        let tensor = match self {
            Expr::Key(key) => data.require(owner, key)?,
            Expr::Const(value) => constant(*value, &data.device()),
            Expr::Unary(op, a) => {
                let a = a.eval(data, owner)?;
                match op {
                    UnaryOp::Neg => a.neg(),
                    UnaryOp::Relu => activation::relu(a),
                    UnaryOp::Abs => a.abs(),
                    UnaryOp::Log => a.log(),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Step => a.greater_elem(0.0).float(),
                    UnaryOp::Sign => sign(a),
                }
            }
            Expr::Binary(op, a, b) => {
                let (a, b) = broadcast(a.eval(data, owner)?, b.eval(data, owner)?)?;
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
            Expr::Powf(a, p) => a.eval(data, owner)?.powf(*p),
            Expr::Slice { expr, axis, range } => {
                let x = expr.eval(data, owner)?;
                let r = ranges(&x, *axis, range)?;
                x.slice(r)
            }
            Expr::Reduce(Reduction::Mean, a) => as_scalar(a.eval(data, owner)?.mean()),
            Expr::Reduce(Reduction::Sum, a) => as_scalar(a.eval(data, owner)?.sum()),
            Expr::Embed {
                expr,
                like,
                axis,
                range,
            } => {
                let like = like.eval(data, owner)?;
                let ranges = ranges(&like, *axis, range)?;
                let region = fit(expr.eval(data, owner)?, ranges.clone().map(|r| r.len()))?;
                like.zeros_like().slice_assign(ranges, region)
            }
            Expr::Fit { expr, like } => {
                let target = like.eval(data, owner)?.dims();
                fit(expr.eval(data, owner)?, target)?
            }
            Expr::OnesLike(a) => a.eval(data, owner)?.ones_like(),
            Expr::Numel(a) => {
                let x = a.eval(data, owner)?;
                constant(x.dims().iter().product::<usize>() as f32, &x.device())
            }
            Expr::Grad { of, wrt } => of.derivative(wrt)?.eval(data, owner)?,
        };
        Ok(tensor)
    }
}

fn sign<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    x.clone().greater_elem(0.0).float() - x.lower_elem(0.0).float()
}

fn ranges<B: Backend>(x: &Tensor<B, 3>, axis: usize, range: &Range<usize>) -> DpcResult<[Range<usize>; 3]> {
    let dims = x.dims();
    if axis >= 3 || range.start >= range.end || range.end > dims[axis] {
        return Err(DpcError::Expression(format!(
            "slice {range:?} on axis {axis} is out of bounds for shape {dims:?}"
        )));
    }
    let mut ranges = dims.map(|d| 0..d);
    ranges[axis] = range.clone();
    Ok(ranges)
}

/// Repeat axes of width one so both operands share a shape.
fn broadcast<B: Backend>(
    mut a: Tensor<B, 3>,
    mut b: Tensor<B, 3>,
) -> DpcResult<(Tensor<B, 3>, Tensor<B, 3>)> {
    let (da, db) = (a.dims(), b.dims());
    for axis in 0..3 {
        match (da[axis], db[axis]) {
            (x, y) if x == y => {}
            (1, y) => a = a.repeat(axis, y),
            (x, 1) => b = b.repeat(axis, x),
            _ => {
                return Err(DpcError::Expression(format!(
                    "cannot broadcast shapes {da:?} and {db:?}"
                )))
            }
        }
    }
    Ok((a, b))
}

/// Sum or repeat axes of `x` until it has the `target` shape.
fn fit<B: Backend>(mut x: Tensor<B, 3>, target: [usize; 3]) -> DpcResult<Tensor<B, 3>> {
    let dims = x.dims();
    for axis in 0..3 {
        match (dims[axis], target[axis]) {
            (d, t) if d == t => {}
            (_, 1) => x = x.sum_dim(axis),
            (1, t) => x = x.repeat(axis, t),
            _ => {
                return Err(DpcError::Expression(format!(
                    "cannot fit shape {dims:?} to {target:?}"
                )))
            }
        }
    }
    Ok(x)
}

fn fmt_range(range: &Range<usize>) -> String {
    format!("{}:{}", range.start, range.end)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Key(key) => write!(f, "{key}"),
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Unary(UnaryOp::Neg, a) => write!(f, "(-{a})"),
            Expr::Unary(op, a) => {
                let name = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Relu => "relu",
                    UnaryOp::Abs => "abs",
                    UnaryOp::Log => "log",
                    UnaryOp::Exp => "exp",
                    UnaryOp::Step => "step",
                    UnaryOp::Sign => "sign",
                };
                write!(f, "{name}({a})")
            }
            Expr::Binary(op, a, b) => {
                let symbol = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                };
                write!(f, "({a} {symbol} {b})")
            }
            Expr::Powf(a, p) => write!(f, "{a}^{p}"),
            Expr::Slice { expr, axis, range } => {
                let mut index = vec![":".to_string(); 3];
                index[*axis] = fmt_range(range);
                write!(f, "{expr}[{}]", index.join(", "))
            }
            Expr::Reduce(Reduction::Mean, a) => write!(f, "mean({a})"),
            Expr::Reduce(Reduction::Sum, a) => write!(f, "sum({a})"),
            Expr::Embed {
                expr,
                like,
                axis,
                range,
            } => write!(f, "embed({expr}, {like}, {axis}, {})", fmt_range(range)),
            Expr::Fit { expr, like } => write!(f, "fit({expr}, {like})"),
            Expr::OnesLike(a) => write!(f, "ones_like({a})"),
            Expr::Numel(a) => write!(f, "numel({a})"),
            Expr::Grad { of, wrt } => write!(f, "d({of})/d{wrt}"),
        }
    }
}
