//! Job stages: the units of work an execution server runs, in order.

use std::fmt;

use serde::{Deserialize, Serialize};
use tcapflow_common::types::SetIdentifier;

/// Where the pipelines of a [`TupleSetJobStage`] read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PipelineSource {
    /// Objects of a stored set; pages are spread over the scan workers.
    Set {
        /// The set to scan.
        set: SetIdentifier,
    },
    /// Partitions of a materialized aggregation; one pipeline per partition.
    AggregationResult {
        /// The hash set holding the aggregation.
        hash_set: String,
    },
    /// Repartitioned rows; one pipeline per partition, each reading its
    /// partition of every page.
    Repartitioned {
        /// The intermediate set holding the rows.
        set: SetIdentifier,
        /// Number of partitions.
        num_partitions: usize,
    },
}

/// Where the pipelines of a [`TupleSetJobStage`] write to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PipelineSink {
    /// User objects into a stored set.
    Set {
        /// The output set.
        set: SetIdentifier,
    },
    /// Partial join maps for a broadcast build.
    BroadcastData {
        /// The intermediate set.
        set: SetIdentifier,
    },
    /// Partitioned partial join maps for a hash-partitioned build.
    HashPartitionedData {
        /// The intermediate set.
        set: SetIdentifier,
        /// Number of partitions.
        num_partitions: usize,
    },
    /// Partitioned partial aggregates.
    AggregationData {
        /// The intermediate set.
        set: SetIdentifier,
        /// Number of partitions.
        num_partitions: usize,
    },
    /// Full rows routed by key hash, for the probe side of a
    /// hash-partitioned join.
    Repartition {
        /// The intermediate set.
        set: SetIdentifier,
        /// Number of partitions.
        num_partitions: usize,
    },
}

impl PipelineSink {
    /// The set written to.
    #[must_use]
    pub fn set(&self) -> &SetIdentifier {
        match self {
            PipelineSink::Set { set }
            | PipelineSink::BroadcastData { set }
            | PipelineSink::HashPartitionedData { set, .. }
            | PipelineSink::AggregationData { set, .. }
            | PipelineSink::Repartition { set, .. } => set,
        }
    }
}

/// A join probed by a pipeline, and the hash set it probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTable {
    /// Output tuple set of the JOIN statement.
    pub tuple_set: String,
    /// Name of the built hash set.
    pub hash_set: String,
}

/// Runs pipelines over one path of tuple sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleSetJobStage {
    /// Position in the plan.
    pub id: usize,
    /// Where the pipelines read from.
    pub source: PipelineSource,
    /// Tuple sets covered, source first.
    pub path: Vec<String>,
    /// Computation owning the sink statement.
    pub target_computation: String,
    /// Where the pipelines write to.
    pub sink: PipelineSink,
    /// Joins probed along the path.
    pub probes: Vec<ProbeTable>,
}

/// Merges partial join maps into one shared table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastJoinBuildHtJobStage {
    /// Position in the plan.
    pub id: usize,
    /// Intermediate set holding the partial maps.
    pub source: SetIdentifier,
    /// Name the table is published under.
    pub hash_set: String,
    /// The join computation.
    pub target_computation: String,
}

/// Merges partitioned partial join maps, one worker per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPartitionedJoinBuildHtJobStage {
    /// Position in the plan.
    pub id: usize,
    /// Intermediate set holding the partial maps.
    pub source: SetIdentifier,
    /// Name the table is published under.
    pub hash_set: String,
    /// The join computation.
    pub target_computation: String,
    /// Number of partitions.
    pub num_partitions: usize,
}

/// What an aggregation does with its finished groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AggregationOutput {
    /// Finalize every group straight into a stored set.
    Set {
        /// The output set.
        set: SetIdentifier,
        /// The OUTPUT computation writing it.
        target_computation: String,
    },
    /// Publish the partitions as a hash set read by later stages.
    HashSet {
        /// The hash-set name.
        name: String,
    },
}

/// Merges partitioned partial aggregates, one worker per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationJobStage {
    /// Position in the plan.
    pub id: usize,
    /// Intermediate set holding the partial aggregates.
    pub source: SetIdentifier,
    /// The aggregation computation.
    pub computation: String,
    /// Output tuple set of the AGGREGATE statement.
    pub tuple_set: String,
    /// Number of partitions.
    pub num_partitions: usize,
    /// What happens to the finished groups.
    pub output: AggregationOutput,
}

/// One stage of a physical plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobStage {
    /// Pipelines over a tuple-set path.
    TupleSet(TupleSetJobStage),
    /// Broadcast join build.
    BroadcastJoinBuildHt(BroadcastJoinBuildHtJobStage),
    /// Hash-partitioned join build.
    HashPartitionedJoinBuildHt(HashPartitionedJoinBuildHtJobStage),
    /// Aggregation build.
    Aggregation(AggregationJobStage),
}

impl JobStage {
    /// Position in the plan.
    #[must_use]
    pub fn id(&self) -> usize {
        match self {
            JobStage::TupleSet(s) => s.id,
            JobStage::BroadcastJoinBuildHt(s) => s.id,
            JobStage::HashPartitionedJoinBuildHt(s) => s.id,
            JobStage::Aggregation(s) => s.id,
        }
    }

    /// Short name of the stage kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            JobStage::TupleSet(_) => "TupleSetJobStage",
            JobStage::BroadcastJoinBuildHt(_) => "BroadcastJoinBuildHtJobStage",
            JobStage::HashPartitionedJoinBuildHt(_) => "HashPartitionedJoinBuildHtJobStage",
            JobStage::Aggregation(_) => "AggregationJobStage",
        }
    }

    /// Returns true for the stages that build a join hash table.
    #[must_use]
    pub fn is_join_build(&self) -> bool {
        matches!(
            self,
            JobStage::BroadcastJoinBuildHt(_) | JobStage::HashPartitionedJoinBuildHt(_)
        )
    }

    /// Name of the hash set this stage publishes, if any.
    #[must_use]
    pub fn published_hash_set(&self) -> Option<&str> {
        match self {
            JobStage::BroadcastJoinBuildHt(s) => Some(&s.hash_set),
            JobStage::HashPartitionedJoinBuildHt(s) => Some(&s.hash_set),
            JobStage::Aggregation(s) => match &s.output {
                AggregationOutput::HashSet { name } => Some(name),
                AggregationOutput::Set { .. } => None,
            },
            JobStage::TupleSet(_) => None,
        }
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineSource::Set { set } => write!(f, "scan {set}"),
            PipelineSource::AggregationResult { hash_set } => write!(f, "aggregation {hash_set}"),
            PipelineSource::Repartitioned {
                set,
                num_partitions,
            } => write!(f, "repartitioned {set} x{num_partitions}"),
        }
    }
}

impl fmt::Display for PipelineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineSink::Set { set } => write!(f, "write {set}"),
            PipelineSink::BroadcastData { set } => write!(f, "broadcast data {set}"),
            PipelineSink::HashPartitionedData {
                set,
                num_partitions,
            } => write!(f, "partitioned data {set} x{num_partitions}"),
            PipelineSink::AggregationData {
                set,
                num_partitions,
            } => write!(f, "aggregation data {set} x{num_partitions}"),
            PipelineSink::Repartition {
                set,
                num_partitions,
            } => write!(f, "repartition {set} x{num_partitions}"),
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.id(), self.kind())?;
        match self {
            JobStage::TupleSet(s) => {
                write!(f, "{} -> {} -> {}", s.source, s.path.join(" -> "), s.sink)?;
                if !s.probes.is_empty() {
                    let probes: Vec<&str> = s.probes.iter().map(|p| p.hash_set.as_str()).collect();
                    write!(f, " (probes {})", probes.join(", "))?;
                }
                Ok(())
            }
            JobStage::BroadcastJoinBuildHt(s) => {
                write!(f, "{} -> hash set {}", s.source, s.hash_set)
            }
            JobStage::HashPartitionedJoinBuildHt(s) => write!(
                f,
                "{} -> hash set {} x{}",
                s.source, s.hash_set, s.num_partitions
            ),
            JobStage::Aggregation(s) => match &s.output {
                AggregationOutput::Set { set, .. } => {
                    write!(f, "{} -> {} -> write {set}", s.source, s.computation)
                }
                AggregationOutput::HashSet { name } => {
                    write!(f, "{} -> {} -> hash set {name}", s.source, s.computation)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        let stage = JobStage::BroadcastJoinBuildHt(BroadcastJoinBuildHtJobStage {
            id: 1,
            source: SetIdentifier::new("job", "JoinComp_2_broadcastData"),
            hash_set: "JoinComp_2_joined".to_string(),
            target_computation: "JoinComp_2".to_string(),
        });
        assert_eq!(
            stage.to_string(),
            "[1] BroadcastJoinBuildHtJobStage: job:JoinComp_2_broadcastData -> hash set JoinComp_2_joined"
        );
        assert!(stage.is_join_build());
        assert_eq!(stage.published_hash_set(), Some("JoinComp_2_joined"));
    }

    #[test]
    fn test_stage_serializes_tagged() {
        let stage = JobStage::TupleSet(TupleSetJobStage {
            id: 0,
            source: PipelineSource::Set {
                set: SetIdentifier::new("db", "in"),
            },
            path: vec!["A".to_string()],
            target_computation: "Output_1".to_string(),
            sink: PipelineSink::Set {
                set: SetIdentifier::new("db", "out"),
            },
            probes: Vec::new(),
        });
        assert_eq!(stage.published_hash_set(), None);
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json["type"], "TupleSet");
        assert_eq!(json["source"]["kind"], "Set");
        let back: JobStage = serde_json::from_value(json).unwrap();
        assert_eq!(back, stage);
    }
}
