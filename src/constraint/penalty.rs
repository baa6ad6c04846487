use std::collections::BTreeMap;
use std::fmt;
use std::ops::Mul;

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use super::expr::{Expr, Reduction, UnaryOp};
use super::loss::{scalar_term, LossTerm};
use super::variable::Variable;
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    LowerEqual,
    GreaterEqual,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Equal => "==",
            Comparison::LowerEqual => "<=",
            Comparison::GreaterEqual => ">=",
        }
    }
}

/// How a constraint violation is turned into a scalar loss.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Penalty {
    /// Mean squared violation.
    Squared,
    /// Mean absolute violation.
    Hinge,
    /// `-log(slack + eps)` with `slack = relu(-g)`. Violated elements sit at
    /// the constant `-log(eps)` and carry no gradient.
    LogBarrier { eps: f32 },
    /// `1 / (slack + eps)`.
    InverseBarrier { eps: f32 },
    /// Augmented Lagrangian with multiplier estimates read from the dictionary
    /// key `multiplier` and penalty parameter `rho`.
    AugmentedLagrangian { multiplier: String, rho: f32 },
}

impl Penalty {
    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            Penalty::LogBarrier { .. } | Penalty::InverseBarrier { .. }
        )
    }
}

/// A soft constraint `lhs (== | <= | >=) rhs`, evaluated as a weighted penalty.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    lhs: Variable,
    rhs: Variable,
    comparison: Comparison,
    penalty: Penalty,
    weight: f32,
    name: String,
    value: Expr,
}

impl Constraint {
    pub fn new(lhs: Variable, rhs: Variable, comparison: Comparison) -> DpcResult<Self> {
        if lhs.keys().is_empty() && rhs.keys().is_empty() {
            return Err(DpcError::Expression(format!(
                "constraint `{lhs} {} {rhs}` references no dictionary key",
                comparison.symbol()
            )));
        }
        let name = format!("{} {} {}", lhs.name(), comparison.symbol(), rhs.name());
        let mut constraint = Self {
            lhs,
            rhs,
            comparison,
            penalty: Penalty::Squared,
            weight: 1.0,
            name,
            value: Expr::Const(0.0),
        };
        constraint.value = constraint.penalty_expr();
        Ok(constraint)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_penalty(mut self, penalty: Penalty) -> DpcResult<Self> {
        if penalty.is_barrier() && self.comparison == Comparison::Equal {
            return Err(DpcError::Expression(format!(
                "{}: barrier penalties need an inequality",
                self.name
            )));
        }
        match &penalty {
            Penalty::LogBarrier { eps } | Penalty::InverseBarrier { eps } if *eps <= 0.0 => {
                return Err(DpcError::Config(format!(
                    "{}: barrier eps must be positive",
                    self.name
                )));
            }
            Penalty::AugmentedLagrangian { rho, .. } if *rho <= 0.0 => {
                return Err(DpcError::Config(format!("{}: rho must be positive", self.name)));
            }
            _ => {}
        }
        self.penalty = penalty;
        self.value = self.penalty_expr();
        Ok(self)
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn penalty(&self) -> &Penalty {
        &self.penalty
    }

    /// Signed violation, positive where the constraint is broken.
    fn violation(&self) -> Expr {
        let (lhs, rhs) = (self.lhs.expr().clone(), self.rhs.expr().clone());
        match self.comparison {
            Comparison::Equal | Comparison::LowerEqual => Expr::sub(lhs, rhs),
            Comparison::GreaterEqual => Expr::sub(rhs, lhs),
        }
    }

    fn penalty_expr(&self) -> Expr {
        let g = self.violation();
        let equality = self.comparison == Comparison::Equal;
        let relu = |e| Expr::unary(UnaryOp::Relu, e);
        let slack = relu(Expr::neg(g.clone()));

        let elementwise = match &self.penalty {
            Penalty::Squared if equality => Expr::powf(g, 2.0),
            Penalty::Squared => Expr::powf(relu(g), 2.0),
            Penalty::Hinge if equality => Expr::unary(UnaryOp::Abs, g),
            Penalty::Hinge => relu(g),
            Penalty::LogBarrier { eps } => Expr::neg(Expr::unary(
                UnaryOp::Log,
                Expr::add(slack, Expr::Const(*eps)),
            )),
            Penalty::InverseBarrier { eps } => {
                Expr::powf(Expr::add(slack, Expr::Const(*eps)), -1.0)
            }
            Penalty::AugmentedLagrangian { multiplier, rho } => {
                let lambda = Expr::key(multiplier.clone());
                if equality {
                    // lambda * g + rho / 2 * g^2
                    Expr::add(
                        Expr::mul(lambda, g.clone()),
                        Expr::mul(Expr::Const(rho / 2.0), Expr::powf(g, 2.0)),
                    )
                } else {
                    // (relu(lambda + rho * g)^2 - lambda^2) / (2 * rho)
                    let shifted = Expr::add(lambda.clone(), Expr::mul(Expr::Const(*rho), g));
                    Expr::div(
                        Expr::sub(Expr::powf(relu(shifted), 2.0), Expr::powf(lambda, 2.0)),
                        Expr::Const(2.0 * rho),
                    )
                }
            }
        };
        Expr::reduce(Reduction::Mean, elementwise)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {} ({:?}, weight {})",
            self.name,
            self.lhs,
            self.comparison.symbol(),
            self.rhs,
            self.penalty,
            self.weight
        )
    }
}

/// `2.0 * constraint` scales the constraint weight.
impl Mul<Constraint> for f32 {
    type Output = Constraint;

    fn mul(self, rhs: Constraint) -> Constraint {
        let weight = rhs.weight * self;
        rhs.with_weight(weight)
    }
}

impl<B: Backend> LossTerm<B> for Constraint {
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

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Data, Shape};

    type TestBackend = NdArray;

    fn data() -> DataDict<TestBackend> {
        let x = Data::new(vec![0.0, 1.0, 2.0, 3.0], Shape::new([4, 1, 1]));
        let lambda = Data::new(vec![0.5], Shape::new([1, 1, 1]));
        DataDict::new("train")
            .with("x", Tensor::from_data(x.convert()))
            .unwrap()
            .with("lambda", Tensor::from_data(lambda.convert()))
            .unwrap()
    }

    fn value(constraint: &Constraint) -> f32 {
        LossTerm::<TestBackend>::evaluate(constraint, &data())
            .unwrap()
            .into_data()
            .convert::<f32>()
            .value[0]
    }

    fn x() -> Variable {
        Variable::from("x")
    }

    #[test]
    fn squared_penalty_only_counts_violations() {
        // x <= 1: violations 0, 0, 1, 2
        let con = x().lower_equal(1.0).unwrap();
        assert_eq!(value(&con), (1.0 + 4.0) / 4.0);

        // x >= 1: violations 1, 0, 0, 0
        let con = x().greater_equal(1.0).unwrap();
        assert_eq!(value(&con), 1.0 / 4.0);

        // x == 1: 1, 0, 1, 4
        let con = x().equal(1.0).unwrap();
        assert_eq!(value(&con), 6.0 / 4.0);
    }

    #[test]
    fn hinge_penalty() {
        let con = x()
            .lower_equal(1.0)
            .unwrap()
            .with_penalty(Penalty::Hinge)
            .unwrap();
        assert_eq!(value(&con), 3.0 / 4.0);
    }

    #[test]
    fn inverse_barrier_grows_near_the_bound() {
        // slack of x <= 4 is 4, 3, 2, 1
        let con = x()
            .lower_equal(4.0)
            .unwrap()
            .with_penalty(Penalty::InverseBarrier { eps: 1e-3 })
            .unwrap();
        let expected = [4.0f32, 3.0, 2.0, 1.0]
            .iter()
            .map(|s| 1.0 / (s + 1e-3))
            .sum::<f32>()
            / 4.0;
        assert!((value(&con) - expected).abs() < 1e-5);
    }

    #[test]
    fn log_barrier_saturates_on_violation() {
        // slack of x <= 1 is 1, 0, 0, 0
        let eps = 1e-3f32;
        let con = x()
            .lower_equal(1.0)
            .unwrap()
            .with_penalty(Penalty::LogBarrier { eps })
            .unwrap();
        let expected = (-(1.0 + eps).ln() - 3.0 * eps.ln()) / 4.0;
        assert!((value(&con) - expected).abs() < 1e-4);
    }

    #[test]
    fn zero_scaled_variable_still_constrains_its_key() {
        let con = (x() * 0.0).lower_equal(1.0).unwrap();
        assert_eq!(LossTerm::<TestBackend>::input_keys(&con), vec!["x"]);
        assert_eq!(value(&con), 0.0);
    }

    #[test]
    fn augmented_lagrangian_reads_multiplier_key() {
        let con = x()
            .equal(1.0)
            .unwrap()
            .with_penalty(Penalty::AugmentedLagrangian {
                multiplier: "lambda".into(),
                rho: 2.0,
            })
            .unwrap();
        assert_eq!(LossTerm::<TestBackend>::input_keys(&con), vec!["lambda", "x"]);

        // g = -1, 0, 1, 2: mean(0.5 * g + g^2) = (0.5 * 2 + 6) / 4
        assert!((value(&con) - 7.0 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn barrier_on_equality_is_rejected() {
        let result = x()
            .equal(1.0)
            .unwrap()
            .with_penalty(Penalty::LogBarrier { eps: 1e-3 });
        assert!(matches!(result, Err(DpcError::Expression(_))));
    }

    #[test]
    fn constant_comparison_is_rejected() {
        let result = Variable::from(1.0).lower_equal(2.0);
        assert!(matches!(result, Err(DpcError::Expression(_))));
    }

    #[test]
    fn scaling_multiplies_weight() {
        let con = 3.0 * x().lower_equal(1.0).unwrap().with_weight(2.0);
        assert_eq!(LossTerm::<TestBackend>::weight(&con), 6.0);
        assert_eq!(LossTerm::<TestBackend>::name(&con), "x <= 1");
    }
}
