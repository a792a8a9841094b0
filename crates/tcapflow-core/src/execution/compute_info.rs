//! Runtime parameters injected into pipeline assembly.
//!
//! A caller of `build_pipeline` passes a map from tuple-set name to
//! [`ComputeInfo`]. The source, each join stage and the sink look up their
//! own entry by the name of the tuple set they produce (or consume, for
//! sinks); a missing entry means "use the default".

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::buffer::PageIterator;
use crate::execution::AggMap;
use crate::hashset::JoinTable;

/// Parameters keyed by tuple-set name.
pub type ComputeParams = HashMap<String, ComputeInfo>;

/// One runtime parameter.
pub enum ComputeInfo {
    /// Hash table probed by a join stage.
    Join(JoinArg),
    /// Pages feeding a source.
    Source(SourceArg),
    /// Partitioning of a shuffle sink.
    Shuffle(ShuffleArg),
    /// Materialized aggregation partitions read back by an aggregate source.
    Aggregates(AggregateArg),
}

impl ComputeInfo {
    /// Short name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ComputeInfo::Join(_) => "Join",
            ComputeInfo::Source(_) => "Source",
            ComputeInfo::Shuffle(_) => "Shuffle",
            ComputeInfo::Aggregates(_) => "Aggregates",
        }
    }
}

impl fmt::Debug for ComputeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeInfo::Join(arg) => f
                .debug_struct("Join")
                .field("rows", &arg.table.len())
                .field("partitions", &arg.table.num_partitions())
                .finish(),
            ComputeInfo::Source(arg) => f
                .debug_struct("Source")
                .field("batch_size", &arg.batch_size)
                .field("partition", &arg.partition)
                .finish_non_exhaustive(),
            ComputeInfo::Shuffle(arg) => arg.fmt(f),
            ComputeInfo::Aggregates(arg) => f
                .debug_struct("Aggregates")
                .field("partitions", &arg.maps.len())
                .field("partition", &arg.partition)
                .finish(),
        }
    }
}

/// Hash table handle for a join stage.
pub struct JoinArg {
    /// The built table.
    pub table: JoinTable,
}

/// Page stream for a source.
pub struct SourceArg {
    /// Pages to read.
    pub pages: Box<dyn PageIterator>,
    /// Maximum rows per batch.
    pub batch_size: usize,
    /// Partition to read, for partitioned containers.
    pub partition: Option<usize>,
}

/// What a shuffle sink produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleMode {
    /// Partial join hash tables, one per partition.
    BuildHashTable,
    /// Full rows routed to their partition.
    Repartition,
}

/// Partitioning for a shuffle sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleArg {
    /// Number of output partitions.
    pub num_partitions: usize,
    /// Output kind.
    pub mode: ShuffleMode,
}

/// Materialized aggregation partitions.
pub struct AggregateArg {
    /// One accumulator per partition.
    pub maps: Arc<Vec<AggMap>>,
    /// Partition to read; `None` reads every partition in order.
    pub partition: Option<usize>,
    /// Maximum rows per batch.
    pub batch_size: usize,
}
