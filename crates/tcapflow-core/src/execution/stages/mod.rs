//! Pipeline stages.
//!
//! Each stage is compiled from one atomic computation and transforms one
//! tuple-set batch into the next:
//!
//! - Filter: keep rows whose boolean column is true
//! - Apply: append the result of a lambda
//! - HashLeft / HashRight / HashOne: append the hash of a key column
//! - Flatten: expand a list column into one row per element
//! - Join: probe a prebuilt hash table
//!
//! Stages are total and free of side effects; only the join stage reads
//! shared state (the hash table it probes).

mod apply;
mod filter;
mod flatten;
mod hash;
mod join;

pub use apply::{ApplyFn, ApplyStage};
pub use filter::FilterStage;
pub use flatten::FlattenStage;
pub use hash::HashStage;
pub use join::JoinProbeStage;

use std::fmt;

use tcapflow_common::utils::error::Result;

use super::TupleSet;

/// The kind of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Boolean selection.
    Filter,
    /// Lambda application.
    Apply,
    /// Hash of the left join key.
    HashLeft,
    /// Hash of the right join key.
    HashRight,
    /// Hash of an aggregation key.
    HashOne,
    /// List expansion.
    Flatten,
    /// Hash-table probe.
    Join,
}

impl StageKind {
    /// Returns the display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Filter => "Filter",
            StageKind::Apply => "Apply",
            StageKind::HashLeft => "HashLeft",
            StageKind::HashRight => "HashRight",
            StageKind::HashOne => "HashOne",
            StageKind::Flatten => "Flatten",
            StageKind::Join => "Join",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One streaming transform of a pipeline.
pub trait Stage: Send {
    /// Transforms one batch into the next.
    fn process(&mut self, input: TupleSet) -> Result<TupleSet>;

    /// Returns the kind of this stage.
    fn kind(&self) -> StageKind;

    /// Returns the name of this stage for debugging.
    fn name(&self) -> &'static str {
        self.kind().name()
    }
}
