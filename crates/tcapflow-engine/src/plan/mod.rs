//! Compiled TCAP programs.
//!
//! - [`LogicalPlan`] - parsed statements plus the computations and lambdas
//!   they name

mod logical;

pub use logical::{ComputationNode, LogicalPlan};
