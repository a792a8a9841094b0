//! Physical planning: from a logical plan to an ordered list of job stages.
//!
//! - [`Statistics`] - per-set sizes that drive the join strategy
//! - [`JobStage`] - the unit the execution server runs
//! - [`PhysicalPlanner`] - walks the TCAP graph from its scans and cuts it
//!   into job stages

mod planner;
mod stages;
mod statistics;

pub use planner::{PhysicalPlan, PhysicalPlanner};
pub use stages::{
    AggregationJobStage, AggregationOutput, BroadcastJoinBuildHtJobStage,
    HashPartitionedJoinBuildHtJobStage, JobStage, PipelineSink, PipelineSource, ProbeTable,
    TupleSetJobStage,
};
pub use statistics::{SetStats, Statistics};
