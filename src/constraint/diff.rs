//! Symbolic differentiation of [`Expr`] trees.
//!
//! `derivative(wrt)` returns the gradient of the summed expression with
//! respect to every element of `wrt`, shaped like `wrt`. The tree is walked
//! from the root, carrying the adjoint of each node down to its operands.
//! Slices write their adjoint back into the sliced region, and broadcast
//! operands sum their adjoint over the repeated axes.

use std::collections::BTreeMap;

use super::expr::{BinaryOp, Expr, Reduction, UnaryOp};
use crate::error::{DpcError, DpcResult};

fn accumulate(a: Option<Expr>, b: Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Expr::add(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn fit(expr: Expr, like: &Expr) -> Expr {
    Expr::Fit {
        expr: Box::new(expr),
        like: Box::new(like.clone()),
    }
}

impl Expr {
    pub fn derivative(&self, wrt: &str) -> DpcResult<Expr> {
        if !self.references(wrt) {
            return Err(DpcError::Expression(format!(
                "`{self}` is not differentiably connected to `{wrt}`"
            )));
        }
        let grad = self.backprop(wrt, Expr::Const(1.0))?;
        Ok(grad.unwrap_or_else(|| fit(Expr::Const(0.0), &Expr::key(wrt))))
    }

    /// Gradient contribution reaching `wrt` when the adjoint `g` flows into
    /// this node. `g` may still be broadcast against the node's shape.
    /// `None` stands for an exact zero.
    fn backprop(&self, wrt: &str, g: Expr) -> DpcResult<Option<Expr>> {
        if !self.references(wrt) {
            return Ok(None);
        }
        let grad = match self {
            Expr::Key(_) => Some(fit(g, self)),
            Expr::Const(_) | Expr::OnesLike(_) | Expr::Numel(_) => None,

            Expr::Unary(op, a) => {
                let local = match op {
                    UnaryOp::Neg => Expr::neg(g),
                    // d relu(a) = step(a)
                    UnaryOp::Relu => Expr::mul(g, Expr::unary(UnaryOp::Step, (**a).clone())),
                    UnaryOp::Abs => Expr::mul(g, Expr::unary(UnaryOp::Sign, (**a).clone())),
                    UnaryOp::Log => Expr::div(g, (**a).clone()),
                    UnaryOp::Exp => Expr::mul(g, self.clone()),
                    UnaryOp::Step | UnaryOp::Sign => return Ok(None),
                };
                a.backprop(wrt, local)?
            }

            Expr::Binary(op, a, b) => {
                let (lhs, rhs) = ((**a).clone(), (**b).clone());
                let (da, db) = match op {
                    BinaryOp::Add => (g.clone(), g),
                    BinaryOp::Sub => (g.clone(), Expr::neg(g)),
                    BinaryOp::Mul => (Expr::mul(g.clone(), rhs), Expr::mul(g, lhs)),
                    // d(a / b) = 1/b da - a/b^2 db
                    BinaryOp::Div => (
                        Expr::div(g.clone(), rhs.clone()),
                        Expr::neg(Expr::div(Expr::mul(g, lhs), Expr::powf(rhs, 2.0))),
                    ),
                };
                accumulate(a.backprop(wrt, da)?, b.backprop(wrt, db)?)
            }

            // d(a^p) = p * a^(p-1)
            Expr::Powf(a, p) => {
                let local = Expr::mul(Expr::Const(*p), Expr::powf((**a).clone(), p - 1.0));
                a.backprop(wrt, Expr::mul(g, local))?
            }

            Expr::Slice { expr, axis, range } => {
                let embedded = Expr::Embed {
                    expr: Box::new(g),
                    like: expr.clone(),
                    axis: *axis,
                    range: range.clone(),
                };
                expr.backprop(wrt, embedded)?
            }

            Expr::Reduce(Reduction::Sum, a) => a.backprop(wrt, fit(g, self))?,
            Expr::Reduce(Reduction::Mean, a) => {
                let count = Expr::Numel(a.clone());
                a.backprop(wrt, Expr::div(fit(g, self), count))?
            }

            Expr::Embed {
                expr, axis, range, ..
            } => {
                let region = Expr::Slice {
                    expr: Box::new(fit(g, self)),
                    axis: *axis,
                    range: range.clone(),
                };
                expr.backprop(wrt, region)?
            }
            Expr::Fit { expr, .. } => expr.backprop(wrt, fit(fit(g, self), expr))?,

            Expr::Grad { of, wrt: inner } => of.derivative(inner)?.backprop(wrt, g)?,
        };
        Ok(grad)
    }

    /// Replace every key found in `defs` by its definition.
    pub fn substitute(&self, defs: &BTreeMap<String, Expr>) -> Expr {
        let sub = |e: &Expr| Box::new(e.substitute(defs));
        match self {
            Expr::Key(key) => defs.get(key).cloned().unwrap_or_else(|| self.clone()),
            Expr::Const(_) => self.clone(),
            Expr::Unary(op, a) => Expr::Unary(*op, sub(a)),
            Expr::Binary(op, a, b) => Expr::Binary(*op, sub(a), sub(b)),
            Expr::Powf(a, p) => Expr::Powf(sub(a), *p),
            Expr::Slice { expr, axis, range } => Expr::Slice {
                expr: sub(expr),
                axis: *axis,
                range: range.clone(),
            },
            Expr::Reduce(op, a) => Expr::Reduce(*op, sub(a)),
            Expr::Embed {
                expr,
                like,
                axis,
                range,
            } => Expr::Embed {
                expr: sub(expr),
                like: sub(like),
                axis: *axis,
                range: range.clone(),
            },
            Expr::Fit { expr, like } => Expr::Fit {
                expr: sub(expr),
                like: sub(like),
            },
            Expr::OnesLike(a) => Expr::OnesLike(sub(a)),
            Expr::Numel(a) => Expr::Numel(sub(a)),
            Expr::Grad { of, wrt } => Expr::Grad {
                of: sub(of),
                wrt: wrt.clone(),
            },
        }
    }

    /// Inline earlier term definitions inside every gradient node, so a
    /// gradient of a term name differentiates through that term.
    ///
    /// Fails when a gradient is not connected to its key after inlining.
    pub fn expand_grads_with(&self, defs: &BTreeMap<String, Expr>) -> DpcResult<Expr> {
        let expand = |e: &Expr| e.expand_grads_with(defs).map(Box::new);
        let expanded = match self {
            Expr::Grad { of, wrt } => {
                let of = of.expand_grads_with(defs)?.substitute(defs);
                if !of.references(wrt) {
                    return Err(DpcError::Expression(format!(
                        "`{of}` is not differentiably connected to `{wrt}`"
                    )));
                }
                Expr::Grad {
                    of: Box::new(of),
                    wrt: wrt.clone(),
                }
            }
            Expr::Key(_) | Expr::Const(_) => self.clone(),
            Expr::Unary(op, a) => Expr::Unary(*op, expand(a)?),
            Expr::Binary(op, a, b) => Expr::Binary(*op, expand(a)?, expand(b)?),
            Expr::Powf(a, p) => Expr::Powf(expand(a)?, *p),
            Expr::Slice { expr, axis, range } => Expr::Slice {
                expr: expand(expr)?,
                axis: *axis,
                range: range.clone(),
            },
            Expr::Reduce(op, a) => Expr::Reduce(*op, expand(a)?),
            Expr::Embed {
                expr,
                like,
                axis,
                range,
            } => Expr::Embed {
                expr: expand(expr)?,
                like: expand(like)?,
                axis: *axis,
                range: range.clone(),
            },
            Expr::Fit { expr, like } => Expr::Fit {
                expr: expand(expr)?,
                like: expand(like)?,
            },
            Expr::OnesLike(a) => Expr::OnesLike(expand(a)?),
            Expr::Numel(a) => Expr::Numel(expand(a)?),
        };
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataDict;
    use burn::backend::NdArray;
    use burn::tensor::{Data, Shape, Tensor};

    type TestBackend = NdArray;

    fn x() -> Expr {
        Expr::key("x")
    }

    fn slice(expr: Expr, axis: usize, range: std::ops::Range<usize>) -> Expr {
        Expr::Slice {
            expr: Box::new(expr),
            axis,
            range,
        }
    }

    fn sum(expr: Expr) -> Expr {
        Expr::reduce(Reduction::Sum, expr)
    }

    fn data(entries: &[(&str, Vec<f32>, [usize; 3])]) -> DataDict<TestBackend> {
        let mut data = DataDict::new("test");
        for (key, values, shape) in entries {
            let values = Data::new(values.clone(), Shape::new(*shape));
            data.insert("test", *key, Tensor::from_data(values.convert()))
                .unwrap();
        }
        data
    }

    fn gradient(f: &Expr, wrt: &str, data: &DataDict<TestBackend>) -> ([usize; 3], Vec<f32>) {
        let grad = f.derivative(wrt).unwrap().eval(data, "grad").unwrap();
        (grad.dims(), grad.into_data().convert::<f32>().value)
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn derivative_of_key_is_ones() {
        let data = data(&[("x", vec![1.0, 2.0, 3.0], [1, 1, 3])]);
        let (dims, grad) = gradient(&x(), "x", &data);
        assert_eq!(dims, [1, 1, 3]);
        assert_close(&grad, &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn product_rule() {
        let data = data(&[
            ("x", vec![1.0, 2.0], [1, 1, 2]),
            ("y", vec![3.0, 4.0], [1, 1, 2]),
        ]);
        let f = Expr::mul(x(), Expr::key("y"));
        assert_close(&gradient(&f, "x", &data).1, &[3.0, 4.0]);
    }

    #[test]
    fn power_rule() {
        let data = data(&[("x", vec![1.0, 2.0], [1, 1, 2])]);
        let f = Expr::powf(x(), 3.0);
        assert_eq!(f.derivative("x").unwrap().to_string(), "fit((3 * x^2), x)");
        assert_close(&gradient(&f, "x", &data).1, &[3.0, 12.0]);
    }

    #[test]
    fn feature_slice_gradient_is_shaped_like_the_key() {
        let data = data(&[("x", vec![1.0, 2.0, 3.0], [1, 1, 3])]);
        let f = sum(Expr::powf(slice(x(), 2, 1..3), 2.0));

        let (dims, grad) = gradient(&f, "x", &data);
        assert_eq!(dims, [1, 1, 3]);
        assert_close(&grad, &[0.0, 4.0, 6.0]);
    }

    #[test]
    fn time_window_gradient_is_shaped_like_the_key() {
        let data = data(&[("X", vec![0.0, 1.0, 3.0, 4.0, 5.0], [5, 1, 1])]);
        let window = slice(Expr::key("X"), 0, 1..4);
        let f = sum(Expr::unary(
            UnaryOp::Relu,
            Expr::sub(window, Expr::Const(2.0)),
        ));

        let (dims, grad) = gradient(&f, "X", &data);
        assert_eq!(dims, [5, 1, 1]);
        assert_close(&grad, &[0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn broadcast_operands_sum_their_gradient() {
        let data = data(&[
            ("c", vec![2.0], [1, 1, 1]),
            ("x", vec![1.0, 2.0, 3.0, 4.0], [1, 2, 2]),
        ]);
        let f = sum(Expr::mul(Expr::key("c"), x()));

        let (dims, grad) = gradient(&f, "c", &data);
        assert_eq!(dims, [1, 1, 1]);
        assert_close(&grad, &[10.0]);
        assert_close(&gradient(&f, "x", &data).1, &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn reduced_factor_collects_the_other_operand() {
        // sum(mean(x) * y) = mean(x) * sum(y)
        let data = data(&[
            ("x", vec![1.0, 3.0], [1, 1, 2]),
            ("y", vec![1.0, 2.0, 3.0], [1, 1, 3]),
        ]);
        let f = sum(Expr::mul(Expr::reduce(Reduction::Mean, x()), Expr::key("y")));

        let (dims, grad) = gradient(&f, "x", &data);
        assert_eq!(dims, [1, 1, 2]);
        assert_close(&grad, &[3.0, 3.0]);
    }

    #[test]
    fn lagrangian_stationarity_over_a_feature_window() {
        // L = sum(v^2) + mu * (sum(v) - 1), v = xy[:, :, 0:2]
        let data = data(&[
            ("xy", vec![1.0, 2.0, 5.0], [1, 1, 3]),
            ("mu", vec![0.5], [1, 1, 1]),
        ]);
        let v = slice(Expr::key("xy"), 2, 0..2);
        let objective = sum(Expr::powf(v.clone(), 2.0));
        let residual = Expr::sub(sum(v), Expr::Const(1.0));
        let lagrangian = Expr::add(objective, Expr::mul(Expr::key("mu"), residual));

        let (dims, grad) = gradient(&lagrangian, "xy", &data);
        assert_eq!(dims, [1, 1, 3]);
        assert_close(&grad, &[2.5, 4.5, 0.0]);
        assert_close(&gradient(&lagrangian, "mu", &data).1, &[2.0]);
    }

    #[test]
    fn second_derivative_through_a_gradient_node() {
        let data = data(&[("x", vec![1.0, 2.0], [1, 1, 2])]);
        let slope = Expr::Grad {
            of: Box::new(Expr::powf(x(), 3.0)),
            wrt: "x".to_string(),
        };
        assert_close(&gradient(&slope, "x", &data).1, &[6.0, 12.0]);
    }

    #[test]
    fn step_only_dependence_has_a_zero_gradient() {
        let data = data(&[("x", vec![-1.0, 2.0], [1, 1, 2])]);
        let f = Expr::unary(UnaryOp::Step, x());
        let (dims, grad) = gradient(&f, "x", &data);
        assert_eq!(dims, [1, 1, 2]);
        assert_close(&grad, &[0.0, 0.0]);
    }

    #[test]
    fn unconnected_key_is_an_error() {
        let f = Expr::mul(x(), Expr::Const(2.0));
        assert!(matches!(f.derivative("y"), Err(DpcError::Expression(_))));
    }

    #[test]
    fn gradients_inline_earlier_terms() {
        let defs = BTreeMap::from([("energy".to_string(), Expr::powf(x(), 2.0))]);
        let g = Expr::Grad {
            of: Box::new(Expr::key("energy")),
            wrt: "x".to_string(),
        };

        let expanded = g.expand_grads_with(&defs).unwrap();
        assert_eq!(
            expanded,
            Expr::Grad {
                of: Box::new(Expr::powf(x(), 2.0)),
                wrt: "x".to_string(),
            }
        );

        assert!(g.expand_grads_with(&BTreeMap::new()).is_err());
    }
}
