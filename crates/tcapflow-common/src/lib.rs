//! # tcapflow-common
//!
//! Foundation layer for Tcapflow: types, memory accounting, and utilities.
//!
//! This crate provides the fundamental building blocks used by all other
//! Tcapflow crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (Value, Row, TupleSpec, identifiers)
//! - [`memory`] - Memory budget, grants, allocation blocks, runtime context
//! - [`utils`] - Utility functions and helpers (hashing, errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;
pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use memory::{AllocationBlock, MemoryBudget, MemoryGrant, RuntimeContext};
pub use types::{PageId, Row, SetIdentifier, TupleSpec, Value};
pub use utils::error::{Error, ParseError, Result};
