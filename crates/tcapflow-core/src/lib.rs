//! # tcapflow-core
//!
//! Execution layer for Tcapflow: tuple sets, pipeline stages, pages, and the
//! shared state that join and aggregation builds hand to probe pipelines.
//!
//! This crate depends only on `tcapflow-common`.
//!
//! ## Modules
//!
//! - [`execution`] - Tuple sets, stages, lambdas, sources, sinks, mergers, pipelines
//! - [`buffer`] - Page codec, pinned pages, bounded circular page buffers
//! - [`hashset`] - Named hash-set registry and join tables
//! - [`workers`] - Worker pool, join handles, cancellation

pub mod buffer;
pub mod execution;
pub mod hashset;
pub mod workers;

// Re-export commonly used types
pub use buffer::{Page, PageCircularBuffer, PageIterator, SharedPage};
pub use execution::{ComputeInfo, ComputeParams, Pipeline, PipelineStats, TupleSet};
pub use hashset::{HashSetManager, JoinTable};
pub use workers::{CancellationToken, WorkerPool};
