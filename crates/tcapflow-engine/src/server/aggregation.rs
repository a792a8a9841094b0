//! Aggregation builds.
//!
//! Partial aggregates are merged per partition like a hash-partitioned join
//! build. The finished partitions are then either written straight to the
//! output set, one pipeline per partition, or published as a hash set that
//! later stages read through the AGGREGATE statement.

use std::sync::Arc;

use tcapflow_common::memory::MemoryGrant;
use tcapflow_common::utils::error::Result;
use tcapflow_core::execution::AggMap;
use tcapflow_core::hashset::HashSetData;

use super::partitioned::partitioned_merge;
use super::tuple_set::{JobInput, PipelineJob, run_all};
use super::ExecutionServer;
use crate::compute_plan::ComputePlan;
use crate::physical::{AggregationJobStage, AggregationOutput};

fn merge(
    server: &ExecutionServer,
    plan: &ComputePlan,
    stage: &AggregationJobStage,
) -> Result<(Arc<Vec<AggMap>>, Vec<MemoryGrant>)> {
    let merger = plan.get_merger(&stage.computation)?;
    let pages = server.store().pinned_pages(&stage.source)?;
    let merged = partitioned_merge(
        server,
        pages,
        merger,
        stage.num_partitions,
        "aggregation table",
    )?;

    let mut maps = Vec::with_capacity(merged.len());
    let mut grants = Vec::with_capacity(merged.len());
    for (acc, grant) in merged {
        maps.push(acc.into_aggregates()?);
        grants.push(grant);
    }
    Ok((Arc::new(maps), grants))
}

/// Returns the number of groups.
pub(super) fn run(
    server: &ExecutionServer,
    plan: &ComputePlan,
    stage: &AggregationJobStage,
) -> Result<usize> {
    match &stage.output {
        AggregationOutput::HashSet { name } => {
            let lease = server.hash_sets().reserve(name)?;
            let (maps, grants) = merge(server, plan, stage)?;
            let groups = maps.iter().map(AggMap::len).sum();
            lease.publish(HashSetData::Aggregate(maps), grants);
            Ok(groups)
        }
        AggregationOutput::Set {
            set,
            target_computation,
        } => {
            let (maps, _grants) = merge(server, plan, stage)?;
            let groups = maps.iter().map(AggMap::len).sum();
            let store = server.store();
            store.create_set(set)?;

            let job = PipelineJob {
                plan: plan.clone(),
                path: vec![stage.tuple_set.clone()],
                target: target_computation.clone(),
                sink_set: set.clone(),
                shuffle: None,
                probes: Vec::new(),
                batch_size: server.config().batch_size,
                context: server.context().clone(),
                store: Arc::clone(store),
            };
            let inputs = (0..maps.len())
                .map(|partition| JobInput::Aggregates {
                    maps: Arc::clone(&maps),
                    partition,
                })
                .collect();
            let stats = run_all(server, &job, inputs)?;
            tracing::debug!(
                "aggregation {} wrote {} groups to {}",
                stage.computation,
                stats.rows_out,
                set
            );
            Ok(groups)
        }
    }
}
