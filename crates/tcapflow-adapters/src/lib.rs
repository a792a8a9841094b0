//! # tcapflow-adapters
//!
//! Adapters layer for Tcapflow: the TCAP intermediate language.
//!
//! ## Modules
//!
//! - [`tcap`] - TCAP lexer, parser, and the atomic computation graph it produces

pub mod tcap;

pub use tcap::{AtomicComputation, AtomicComputationList, AtomicOp, parse_tcap};
