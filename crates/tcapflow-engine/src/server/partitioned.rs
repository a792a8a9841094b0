//! Hash-partitioned builds.
//!
//! The calling thread scans the source once and hands every page to every
//! partition's buffer. Each partition worker merges only its own partition
//! of each page. A page is unpinned once the dispatcher and every worker
//! have let go of it.

use std::sync::Arc;

use tcapflow_common::memory::MemoryGrant;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::buffer::{
    PageCircularBuffer, PageCircularBufferIterator, PageIterator, SharedPage,
};
use tcapflow_core::execution::{Container, SinkMerger};
use tcapflow_core::hashset::{HashSetData, JoinTable};
use tcapflow_core::workers::{CancellationToken, WorkHandle, join_all};

use super::{ExecutionServer, charge_accumulator};
use crate::compute_plan::ComputePlan;
use crate::physical::HashPartitionedJoinBuildHtJobStage;

/// Merges partition `p` of every page into accumulator `p`, one worker per
/// partition. Returns the accumulators with their memory grants, in
/// partition order.
pub(super) fn partitioned_merge(
    server: &ExecutionServer,
    pages: Vec<SharedPage>,
    merger: Arc<dyn SinkMerger>,
    num_partitions: usize,
    what: &'static str,
) -> Result<Vec<(Container, MemoryGrant)>> {
    let pool_size = server.pool().size();
    if pool_size < num_partitions {
        return Err(Error::ResourceBusy(format!(
            "{num_partitions} partitions need as many workers, the pool has {pool_size}"
        )));
    }

    let config = server.config();
    let total: usize = pages.iter().map(|p| p.page().len()).sum();
    let per_partition =
        (total as f64 * config.shuffle_overlap_ratio / num_partitions.max(1) as f64) as usize;
    let grants = (0..num_partitions)
        .map(|_| server.context().reserve(per_partition))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        "{}: {} pages over {} partitions, {} bytes each",
        what,
        pages.len(),
        num_partitions,
        per_partition
    );

    let token = CancellationToken::new();
    let buffers: Vec<Arc<PageCircularBuffer>> = (0..num_partitions)
        .map(|_| Arc::new(PageCircularBuffer::new(config.buffer_depth, token.clone())))
        .collect();

    let mut handles: Vec<WorkHandle<(Container, MemoryGrant)>> =
        Vec::with_capacity(num_partitions);
    for (partition, (buffer, mut grant)) in buffers.iter().zip(grants).enumerate() {
        let merger = Arc::clone(&merger);
        let mut input = PageCircularBufferIterator::new(Arc::clone(buffer));
        let spawned = server.pool().execute_cancellable(&token, move || {
            let mut acc = merger.create_new_output_container();
            while let Some(page) = input.next_page()? {
                let partials = page.page().decode()?;
                drop(page);
                merger.write_vector_out(partials, partition, &mut acc)?;
                charge_accumulator(&mut grant, acc.footprint(), what)?;
            }
            Ok((acc, grant))
        });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                token.cancel();
                buffers.iter().for_each(|b| b.close());
                let _ = join_all(handles);
                return Err(e);
            }
        }
    }

    let dispatched = dispatch(pages, &buffers);
    if dispatched.is_err() {
        token.cancel();
    }
    buffers.iter().for_each(|b| b.close());

    match (dispatched, join_all(handles)) {
        (Ok(()), joined) => joined,
        (Err(_), Err(worker)) if !matches!(worker, Error::Cancelled) => Err(worker),
        (Err(e), _) => Err(e),
    }
}

fn dispatch(pages: Vec<SharedPage>, buffers: &[Arc<PageCircularBuffer>]) -> Result<()> {
    for page in pages {
        for buffer in buffers {
            buffer.add_page_to_tail(Arc::clone(&page))?;
        }
    }
    Ok(())
}

/// Returns the number of rows in the published table.
pub(super) fn run(
    server: &ExecutionServer,
    plan: &ComputePlan,
    stage: &HashPartitionedJoinBuildHtJobStage,
) -> Result<usize> {
    let lease = server.hash_sets().reserve(&stage.hash_set)?;
    let merger = plan.get_merger(&stage.target_computation)?;
    let pages = server.store().pinned_pages(&stage.source)?;

    let merged = partitioned_merge(
        server,
        pages,
        merger,
        stage.num_partitions,
        "partitioned hash table",
    )?;
    let mut maps = Vec::with_capacity(merged.len());
    let mut grants = Vec::with_capacity(merged.len());
    for (acc, grant) in merged {
        maps.push(acc.into_join_map()?);
        grants.push(grant);
    }

    let table = JoinTable::Partitioned(Arc::new(maps));
    let rows = table.len();
    lease.publish(HashSetData::Join(table), grants);
    Ok(rows)
}
