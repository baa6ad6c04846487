//! Objectives and soft constraints over dictionary keys.
//!
//! [`Variable`]s are symbolic handles built from keys with ordinary
//! arithmetic. An objective minimizes the mean of a variable; comparing two
//! variables yields a [`Constraint`] whose value is a [`Penalty`].

pub mod diff;
pub mod expr;
pub mod loss;
pub mod penalty;
pub mod variable;

pub use expr::{BinaryOp, Expr, Reduction, UnaryOp};
pub use loss::{Loss, LossTerm, Objective};
pub use penalty::{Comparison, Constraint, Penalty};
pub use variable::Variable;
