//! Broadcast join build: one thread merges every partial map into one
//! shared table.

use std::sync::Arc;

use tcapflow_common::memory::{MemoryGrant, RuntimeContext};
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::hashset::{HashSetData, JoinTable};
use tcapflow_core::workers::CancellationToken;

use super::{ExecutionServer, charge_accumulator};
use crate::compute_plan::ComputePlan;
use crate::physical::BroadcastJoinBuildHtJobStage;

/// Reserves `estimate * ratio` bytes, retrying once with `retry_ratio` if
/// the budget cannot cover the first attempt.
fn reserve_table(
    context: &RuntimeContext,
    estimate: usize,
    ratio: f64,
    retry_ratio: f64,
) -> Result<MemoryGrant> {
    let first = (estimate as f64 * ratio) as usize;
    match context.reserve(first) {
        Err(Error::OutOfMemory { available, .. }) => {
            let retry = (estimate as f64 * retry_ratio) as usize;
            tracing::warn!(
                "broadcast table of {} bytes does not fit ({} available), retrying with {} bytes",
                first,
                available,
                retry
            );
            context.reserve(retry)
        }
        other => other,
    }
}

/// Returns the number of rows in the published table.
pub(super) fn run(
    server: &ExecutionServer,
    plan: &ComputePlan,
    stage: &BroadcastJoinBuildHtJobStage,
) -> Result<usize> {
    let lease = server.hash_sets().reserve(&stage.hash_set)?;
    let merger = plan.get_merger(&stage.target_computation)?;
    let pages = server.store().pinned_pages(&stage.source)?;

    let largest = pages.iter().map(|p| p.page().len()).max().unwrap_or(0);
    let estimate = largest * pages.len();
    let config = server.config();
    let mut grant = reserve_table(
        server.context(),
        estimate,
        config.hash_table_ratio,
        config.hash_table_retry_ratio,
    )?;
    tracing::debug!(
        "broadcast build of {} from {} pages, {} bytes reserved",
        stage.hash_set,
        pages.len(),
        grant.size()
    );

    let token = CancellationToken::new();
    let handle = server.pool().execute_cancellable(&token, move || {
        let mut acc = merger.create_new_output_container();
        for page in pages {
            let partial = page.page().decode()?;
            drop(page);
            merger.write_out(partial, &mut acc)?;
            charge_accumulator(&mut grant, acc.footprint(), "broadcast hash table")?;
        }
        Ok((acc, grant))
    })?;
    let (acc, grant) = handle.join()?;

    let map = acc.into_join_map()?;
    let rows = map.len();
    lease.publish(HashSetData::Join(JoinTable::Shared(Arc::new(map))), vec![grant]);
    Ok(rows)
}
