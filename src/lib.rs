//! Differentiable predictive control problem graphs.
//!
//! Raw named time series are normalized, split and cut into past/future windows
//! ([`data`]); learnable [`modules`] consume and produce named tensors; the
//! [`constraint`] layer builds objective and penalty terms from dictionary keys;
//! and [`problem::Problem`] threads one [`data::DataDict`] through all of it and
//! accumulates the weighted loss.

pub mod constraint;
pub mod data;
pub mod error;
pub mod modules;
pub mod problem;
pub mod utils;

pub use error::{DpcError, DpcResult};
pub use problem::{Problem, ProblemBuilder};
