//! # tcapflow-engine
//!
//! The main entry point for Tcapflow: computation graphs, their TCAP
//! compilation, pipeline assembly, physical planning, and job-stage
//! execution.
//!
//! ## Modules
//!
//! - [`computation`] - The `Computation` trait and built-in computations
//! - [`analyzer`] - Linearizes a computation graph into TCAP text
//! - [`plan`] - Parsed TCAP bound to its computations and lambdas
//! - [`compute_plan`] - Pipeline assembly and sink mergers
//! - [`physical`] - Statistics, job stages, and the physical planner
//! - [`server`] - The execution server and its storage collaborator
//! - [`config`] - Configuration options

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod analyzer;
pub mod computation;
pub mod compute_plan;
pub mod config;
pub mod physical;
pub mod plan;
pub mod server;

pub use analyzer::{AnalyzedGraph, QueryGraphAnalyzer};
pub use compute_plan::{ComputePlan, PipelineShape, describe_pipeline};
pub use config::Config;
pub use physical::{JobStage, PhysicalPlan, PhysicalPlanner, Statistics};
pub use plan::LogicalPlan;
pub use server::{ExecutionServer, MemoryStore, SetStore, StageResult};
