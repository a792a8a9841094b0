//! The physical planner.
//!
//! Scans are visited in ascending cost. From each scan the planner follows
//! consumers downstream, growing one pipeline path, until the path hits a
//! statement that ends a pipeline:
//!
//! - OUTPUT: the path becomes a [`TupleSetJobStage`] writing the set
//! - AGGREGATE: the path writes partial aggregates, followed by an
//!   [`AggregationJobStage`]; if the aggregate feeds more than a single
//!   OUTPUT, its result is published as a hash set and walked further
//! - JOIN reached first: the path builds the join's hash table, by broadcast
//!   when its scan costs at most the threshold and hash-partitioned otherwise
//! - JOIN already built: a broadcast table is probed in place; a partitioned
//!   table needs the path repartitioned first, and a new path continues from
//!   the repartitioned rows
//!
//! A tuple set with several consumers forks the walk.

use hashbrown::HashMap;
use serde::Serialize;
use tcapflow_adapters::tcap::{AtomicComputation, AtomicComputationList, AtomicOp};
use tcapflow_common::types::SetIdentifier;
use tcapflow_common::utils::error::{Error, Result};

use super::stages::{
    AggregationJobStage, AggregationOutput, BroadcastJoinBuildHtJobStage,
    HashPartitionedJoinBuildHtJobStage, JobStage, PipelineSink, PipelineSource, ProbeTable,
    TupleSetJobStage,
};
use super::statistics::Statistics;
use crate::config::Config;

/// An ordered list of job stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalPlan {
    /// Database holding the intermediate sets.
    pub job_id: String,
    /// Stages, in execution order.
    pub stages: Vec<JobStage>,
    /// Intermediate sets to remove once the plan finishes.
    pub intermediate_sets: Vec<SetIdentifier>,
}

impl PhysicalPlan {
    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the plan has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Turns parsed TCAP into job stages.
#[derive(Debug, Clone)]
pub struct PhysicalPlanner {
    broadcast_join_threshold: usize,
    num_partitions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildKind {
    Broadcast,
    Partitioned,
}

#[derive(Debug, Clone)]
struct Branch {
    source: PipelineSource,
    path: Vec<String>,
    probes: Vec<ProbeTable>,
    cost: usize,
}

struct Walk<'a> {
    list: &'a AtomicComputationList,
    job_id: &'a str,
    stages: Vec<JobStage>,
    intermediate_sets: Vec<SetIdentifier>,
    built: HashMap<String, BuildKind>,
}

impl PhysicalPlanner {
    /// Creates a planner using the join threshold and partition count of
    /// `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            broadcast_join_threshold: config.broadcast_join_threshold,
            num_partitions: config.num_partitions.max(1),
        }
    }

    /// Plans `list`. Intermediate sets are created in database `job_id`.
    ///
    /// # Errors
    ///
    /// Fails if the program has no scans, or a tuple set has no consumer
    /// that could end its pipeline.
    pub fn plan(
        &self,
        list: &AtomicComputationList,
        stats: &Statistics,
        job_id: &str,
    ) -> Result<PhysicalPlan> {
        let mut scans: Vec<(&AtomicComputation, SetIdentifier)> = list
            .scans()
            .filter_map(|scan| match &scan.op {
                AtomicOp::Scan { db, set } => Some((scan, SetIdentifier::new(db, set))),
                _ => None,
            })
            .collect();
        if scans.is_empty() {
            return Err(Error::NoSourceFound("the program has no SCAN".to_string()));
        }
        scans.sort_by_key(|(_, set)| stats.cost(set));

        let mut walk = Walk {
            list,
            job_id,
            stages: Vec::new(),
            intermediate_sets: Vec::new(),
            built: HashMap::new(),
        };
        for (scan, set) in scans {
            let cost = stats.cost(&set);
            walk.branch(
                self,
                Branch {
                    source: PipelineSource::Set { set },
                    path: vec![scan.output_name().to_string()],
                    probes: Vec::new(),
                    cost,
                },
            )?;
        }

        tracing::debug!(
            "physical plan '{}': {} stages, {} intermediate sets",
            job_id,
            walk.stages.len(),
            walk.intermediate_sets.len()
        );
        Ok(PhysicalPlan {
            job_id: job_id.to_string(),
            stages: walk.stages,
            intermediate_sets: walk.intermediate_sets,
        })
    }
}

impl Walk<'_> {
    fn intermediate(&mut self, name: String) -> SetIdentifier {
        let set = SetIdentifier::new(self.job_id, name);
        self.intermediate_sets.push(set.clone());
        set
    }

    fn push(&mut self, make: impl FnOnce(usize) -> JobStage) {
        let id = self.stages.len();
        self.stages.push(make(id));
    }

    fn tuple_set_stage(&mut self, branch: Branch, target: &str, sink: PipelineSink) {
        self.push(|id| {
            JobStage::TupleSet(TupleSetJobStage {
                id,
                source: branch.source,
                path: branch.path,
                target_computation: target.to_string(),
                sink,
                probes: branch.probes,
            })
        });
    }

    fn branch(&mut self, planner: &PhysicalPlanner, branch: Branch) -> Result<()> {
        let list = self.list;
        let last = branch.path.last().cloned().unwrap_or_default();
        let consumers = list.consumers(&last);
        if consumers.is_empty() {
            return Err(Error::NoSinkFound {
                tuple_set: last,
                computation: "any consumer".to_string(),
            });
        }

        let forks = consumers.len();
        let mut branch = Some(branch);
        for (i, consumer) in consumers.into_iter().enumerate() {
            let current = if i + 1 == forks {
                branch.take()
            } else {
                branch.clone()
            };
            let Some(mut current) = current else {
                break;
            };
            let n = planner.num_partitions;
            let target = consumer.computation_name.as_str();
            match &consumer.op {
                AtomicOp::Output { db, set } => {
                    let set = SetIdentifier::new(db, set);
                    self.tuple_set_stage(current, target, PipelineSink::Set { set });
                }
                AtomicOp::Aggregate => self.aggregate(planner, current, consumer)?,
                AtomicOp::Join { .. } => {
                    let join_output = consumer.output_name().to_string();
                    match self.built.get(&join_output).copied() {
                        None => self.build_join(planner, current, consumer),
                        Some(BuildKind::Broadcast) => {
                            current.probes.push(ProbeTable {
                                tuple_set: join_output.clone(),
                                hash_set: join_output.clone(),
                            });
                            current.path.push(join_output);
                            self.branch(planner, current)?;
                        }
                        Some(BuildKind::Partitioned) => {
                            let set = self.intermediate(format!("{last}_repartitionData"));
                            let cost = current.cost;
                            self.tuple_set_stage(
                                current,
                                target,
                                PipelineSink::Repartition {
                                    set: set.clone(),
                                    num_partitions: n,
                                },
                            );
                            self.branch(
                                planner,
                                Branch {
                                    source: PipelineSource::Repartitioned {
                                        set,
                                        num_partitions: n,
                                    },
                                    path: vec![last.clone(), join_output.clone()],
                                    probes: vec![ProbeTable {
                                        tuple_set: join_output.clone(),
                                        hash_set: join_output,
                                    }],
                                    cost,
                                },
                            )?;
                        }
                    }
                }
                AtomicOp::Scan { .. } => {
                    return Err(Error::Internal(format!(
                        "SCAN '{}' reads a tuple set",
                        consumer.output_name()
                    )));
                }
                AtomicOp::Apply { .. }
                | AtomicOp::Filter
                | AtomicOp::HashLeft { .. }
                | AtomicOp::HashRight { .. }
                | AtomicOp::HashOne
                | AtomicOp::Flatten => {
                    current.path.push(consumer.output_name().to_string());
                    self.branch(planner, current)?;
                }
            }
        }
        Ok(())
    }

    fn build_join(&mut self, planner: &PhysicalPlanner, branch: Branch, join: &AtomicComputation) {
        let target = join.computation_name.as_str();
        let hash_set = join.output_name().to_string();
        if branch.cost <= planner.broadcast_join_threshold {
            let set = self.intermediate(format!("{target}_broadcastData"));
            self.tuple_set_stage(branch, target, PipelineSink::BroadcastData { set: set.clone() });
            self.push(|id| {
                JobStage::BroadcastJoinBuildHt(BroadcastJoinBuildHtJobStage {
                    id,
                    source: set,
                    hash_set: hash_set.clone(),
                    target_computation: target.to_string(),
                })
            });
            self.built.insert(hash_set, BuildKind::Broadcast);
        } else {
            let n = planner.num_partitions;
            let set = self.intermediate(format!("{target}_hashPartitionedData"));
            self.tuple_set_stage(
                branch,
                target,
                PipelineSink::HashPartitionedData {
                    set: set.clone(),
                    num_partitions: n,
                },
            );
            self.push(|id| {
                JobStage::HashPartitionedJoinBuildHt(HashPartitionedJoinBuildHtJobStage {
                    id,
                    source: set,
                    hash_set: hash_set.clone(),
                    target_computation: target.to_string(),
                    num_partitions: n,
                })
            });
            self.built.insert(hash_set, BuildKind::Partitioned);
        }
    }

    fn aggregate(
        &mut self,
        planner: &PhysicalPlanner,
        branch: Branch,
        aggregate: &AtomicComputation,
    ) -> Result<()> {
        let n = planner.num_partitions;
        let computation = aggregate.computation_name.clone();
        let tuple_set = aggregate.output_name().to_string();
        let cost = branch.cost;

        let set = self.intermediate(format!("{computation}_aggregationData"));
        self.tuple_set_stage(
            branch,
            &computation,
            PipelineSink::AggregationData {
                set: set.clone(),
                num_partitions: n,
            },
        );

        let consumers = self.list.consumers(&tuple_set);
        let output = match consumers.as_slice() {
            [only] => match &only.op {
                AtomicOp::Output { db, set } => Some(AggregationOutput::Set {
                    set: SetIdentifier::new(db, set),
                    target_computation: only.computation_name.clone(),
                }),
                _ => None,
            },
            _ => None,
        };
        let (output, walk_on) = match output {
            Some(output) => (output, None),
            None => {
                let name = format!("{computation}_aggregationResult");
                (AggregationOutput::HashSet { name: name.clone() }, Some(name))
            }
        };
        self.push(|id| {
            JobStage::Aggregation(AggregationJobStage {
                id,
                source: set,
                computation: computation.clone(),
                tuple_set: tuple_set.clone(),
                num_partitions: n,
                output,
            })
        });

        if let Some(hash_set) = walk_on {
            self.branch(
                planner,
                Branch {
                    source: PipelineSource::AggregationResult { hash_set },
                    path: vec![tuple_set],
                    probes: Vec::new(),
                    cost,
                },
            )?;
        }
        Ok(())
    }
}
