//! Pipeline execution primitives.
//!
//! Data flows through a pipeline as columnar [`TupleSet`] batches:
//!
//! ```text
//! ComputeSource -> Stage -> Stage -> ... -> ComputeSink -> output pages
//! ```
//!
//! Each stage is compiled from one atomic computation. Sinks write into page
//! containers; [`SinkMerger`]s fold the partial containers of a shuffle back
//! into one table.

mod compute_info;
mod container;
pub mod lambda;
mod merger;
mod pipeline;
mod sink;
mod source;
pub mod stages;
mod tuple_set;

pub use compute_info::{
    AggregateArg, ComputeInfo, ComputeParams, JoinArg, ShuffleArg, ShuffleMode, SourceArg,
};
pub use container::{AggMap, CombineFn, Container, ENTRY_OVERHEAD, JoinMap};
pub use lambda::{EqualsLambda, FnLambda, Lambda};
pub use merger::{AggregationSinkMerger, JoinSinkMerger, SinkMerger};
pub use pipeline::{
    OutputPage, PageAllocator, PageDiscarder, PageFlusher, Pipeline, PipelineStats,
};
pub use sink::{
    AggregationSink, ComputeSink, JoinMapSink, ObjectSink, PartitionedJoinMapSink,
    RepartitionSink, WriteProgress,
};
pub use source::{AggregateSource, ComputeSource, FinalizeFn, ObjectSource, RowSource};
pub use stages::{Stage, StageKind};
pub use tuple_set::{TupleSet, TupleSetBuilder};
