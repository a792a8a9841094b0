//! Job-stage execution.
//!
//! An [`ExecutionServer`] runs the stages of a [`PhysicalPlan`] one at a
//! time. Every stage takes the scanner lease for its whole run, so a second
//! stage requested while one is in flight fails with
//! [`Error::ResourceBusy`].

mod aggregation;
mod broadcast;
mod partitioned;
mod storage;
mod tuple_set;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tcapflow_adapters::tcap::{AtomicComputationList, AtomicOp};
use tcapflow_common::memory::{AllocationBlock, MemoryGrant, RuntimeContext};
use tcapflow_common::types::SetIdentifier;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::buffer::Page;
use tcapflow_core::execution::{OutputPage, PageAllocator, PageDiscarder, PageFlusher};
use tcapflow_core::hashset::HashSetManager;
use tcapflow_core::workers::WorkerPool;

pub use storage::{MemoryStore, SetStore};

use crate::compute_plan::ComputePlan;
use crate::config::Config;
use crate::physical::{JobStage, PhysicalPlan, PhysicalPlanner, Statistics};

/// The outcome of one job stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    /// Id of the stage.
    pub stage_id: usize,
    /// Whether the stage finished.
    pub success: bool,
    /// A summary on success, the error on failure.
    pub message: String,
}

/// Runs job stages against a [`SetStore`].
pub struct ExecutionServer {
    /// Server configuration.
    config: Config,
    /// Memory accounting and page ids.
    context: RuntimeContext,
    /// Workers for scans and partitioned builds.
    pool: WorkerPool,
    /// Published join tables and aggregations.
    hash_sets: Arc<HashSetManager>,
    /// Stored sets.
    store: Arc<dyn SetStore>,
    /// Held by the stage in flight.
    scanner: Mutex<()>,
}

impl ExecutionServer {
    /// Creates a server with a worker pool of `config.num_threads`.
    ///
    /// # Errors
    ///
    /// Fails if the worker threads cannot be spawned.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tcapflow_engine::{Config, ExecutionServer, MemoryStore};
    ///
    /// let server = ExecutionServer::new(
    ///     Config::default().with_num_threads(2),
    ///     Arc::new(MemoryStore::new()),
    /// )
    /// .unwrap();
    /// assert!(server.hash_sets().is_empty());
    /// ```
    pub fn new(config: Config, store: Arc<dyn SetStore>) -> Result<Self> {
        let context = RuntimeContext::new(config.memory_limit, config.page_size);
        let pool = WorkerPool::new(config.num_threads)?;
        Ok(Self {
            config,
            context,
            pool,
            hash_sets: HashSetManager::new(),
            store,
            scanner: Mutex::new(()),
        })
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The runtime context shared by all stages.
    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// The hash-set registry.
    #[must_use]
    pub fn hash_sets(&self) -> &Arc<HashSetManager> {
        &self.hash_sets
    }

    /// The storage collaborator.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SetStore> {
        &self.store
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Statistics for every set `list` scans.
    #[must_use]
    pub fn statistics(&self, list: &AtomicComputationList) -> Statistics {
        let mut stats = Statistics::new();
        for scan in list.scans() {
            if let AtomicOp::Scan { db, set } = &scan.op {
                let set = SetIdentifier::new(db, set);
                if let Some(s) = self.store.stats(&set) {
                    stats.insert(set, s);
                }
            }
        }
        stats
    }

    /// Plans `plan` with the statistics of the stored sets.
    ///
    /// # Errors
    ///
    /// Fails if the TCAP does not compile or cannot be planned.
    pub fn plan(&self, plan: &ComputePlan, job_id: &str) -> Result<PhysicalPlan> {
        let logical = plan.get_plan()?;
        let stats = self.statistics(logical.computations());
        PhysicalPlanner::new(&self.config).plan(logical.computations(), &stats, job_id)
    }

    /// Runs one job stage. Failures are reported in the result, not raised.
    pub fn execute_job_stage(&self, plan: &ComputePlan, stage: &JobStage) -> StageResult {
        match self.run_stage(plan, stage) {
            Ok(message) => {
                tracing::info!("{} finished: {}", stage, message);
                StageResult {
                    stage_id: stage.id(),
                    success: true,
                    message,
                }
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", stage, e);
                StageResult {
                    stage_id: stage.id(),
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Runs the stages of `physical` in order, stopping at the first
    /// failure. The hash sets its stages published and its intermediate
    /// sets are removed afterwards either way; output already written stays.
    /// Hash sets of other jobs are left alone.
    pub fn execute_plan(&self, plan: &ComputePlan, physical: &PhysicalPlan) -> Vec<StageResult> {
        let mut results = Vec::with_capacity(physical.len());
        let mut published = Vec::new();
        for stage in &physical.stages {
            let result = self.execute_job_stage(plan, stage);
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
            if let Some(name) = stage.published_hash_set() {
                published.push(name);
            }
        }

        let removed = self.hash_sets.remove_all(published);
        for set in &physical.intermediate_sets {
            if let Err(e) = self.store.remove_set(set) {
                tracing::warn!("could not remove intermediate set {}: {}", set, e);
            }
        }
        tracing::debug!(
            "job '{}' cleaned up {} hash sets and {} intermediate sets",
            physical.job_id,
            removed,
            physical.intermediate_sets.len()
        );
        results
    }

    /// Plans and runs `plan`.
    ///
    /// # Errors
    ///
    /// Fails only if planning fails; stage failures are in the results.
    pub fn execute(&self, plan: &ComputePlan, job_id: &str) -> Result<Vec<StageResult>> {
        let physical = self.plan(plan, job_id)?;
        Ok(self.execute_plan(plan, &physical))
    }

    fn lease_scanner(&self) -> Result<MutexGuard<'_, ()>> {
        self.scanner.try_lock().ok_or_else(|| {
            Error::ResourceBusy("another job stage holds the scanner".to_string())
        })
    }

    fn run_stage(&self, plan: &ComputePlan, stage: &JobStage) -> Result<String> {
        let _lease = self.lease_scanner()?;
        match stage {
            JobStage::TupleSet(s) => {
                let stats = tuple_set::run(self, plan, s)?;
                Ok(format!(
                    "{} rows in, {} rows out, {} pages written",
                    stats.rows_in, stats.rows_out, stats.pages_flushed
                ))
            }
            JobStage::BroadcastJoinBuildHt(s) => {
                let rows = broadcast::run(self, plan, s)?;
                Ok(format!("hash set {} holds {} rows", s.hash_set, rows))
            }
            JobStage::HashPartitionedJoinBuildHt(s) => {
                let rows = partitioned::run(self, plan, s)?;
                Ok(format!(
                    "hash set {} holds {} rows in {} partitions",
                    s.hash_set, rows, s.num_partitions
                ))
            }
            JobStage::Aggregation(s) => {
                let groups = aggregation::run(self, plan, s)?;
                Ok(format!("{} groups in {} partitions", groups, s.num_partitions))
            }
        }
    }
}

/// Page callbacks writing finished pages into `set`.
pub(crate) fn page_callbacks(
    context: &RuntimeContext,
    store: &Arc<dyn SetStore>,
    set: SetIdentifier,
) -> (PageAllocator, PageDiscarder, PageFlusher) {
    let context = context.clone();
    let store = Arc::clone(store);
    let allocator: PageAllocator = Box::new(move || context.allocate_block());
    let discarder: PageDiscarder = Box::new(drop::<AllocationBlock>);
    let flusher: PageFlusher = Box::new(move |page: OutputPage| {
        let encoded = Page::encode(page.block.id(), &page.container)?;
        store.add_page(&set, encoded)
    });
    (allocator, discarder, flusher)
}

/// Keeps `grant` at least as large as an accumulator of `footprint` bytes.
/// Growth doubles the grant when the budget allows it, and otherwise takes
/// only what the footprint needs.
pub(crate) fn charge_accumulator(grant: &mut MemoryGrant, footprint: usize, what: &str) -> Result<()> {
    let size = grant.size();
    if footprint <= size {
        return Ok(());
    }
    let needed = footprint - size;
    let doubled = footprint.max(size.saturating_mul(2)) - size;
    tracing::warn!(
        "{} outgrew its {} byte page, growing to {} bytes",
        what,
        size,
        size + doubled
    );
    match grant.grow(doubled) {
        Err(Error::OutOfMemory { .. }) if doubled > needed => {
            tracing::debug!("{} cannot double, growing to {} bytes", what, footprint);
            grant.grow(needed)
        }
        other => other,
    }
    .map_err(|e| match e {
        Error::OutOfMemory { available, .. } => Error::NotEnoughSpace {
            requested: needed,
            remaining: available,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{Computation, ScanUserSet, WriteUserSet};
    use tcapflow_common::memory::MemoryBudget;
    use tcapflow_common::types::Value;

    fn copy_plan() -> ComputePlan {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "in"));
        let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(scan, "db", "out"));
        ComputePlan::from_sinks(vec![out]).unwrap()
    }

    fn server(store: Arc<MemoryStore>) -> ExecutionServer {
        ExecutionServer::new(
            Config::default()
                .with_num_threads(2)
                .with_page_size(4096)
                .with_memory_limit(1 << 20),
            store,
        )
        .unwrap()
    }

    #[test]
    fn test_copy_job() {
        let store = Arc::new(MemoryStore::new());
        let input = SetIdentifier::new("db", "in");
        store
            .store_objects(&input, (0..100).map(Value::Int64).collect(), 10)
            .unwrap();
        let server = server(Arc::clone(&store));

        let results = server.execute(&copy_plan(), "job").unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success, "{}", results[0].message);

        let mut out = store.read_objects(&SetIdentifier::new("db", "out")).unwrap();
        out.sort_by_key(|v| match v {
            Value::Int64(i) => *i,
            _ => i64::MIN,
        });
        assert_eq!(out, (0..100).map(Value::Int64).collect::<Vec<_>>());
        assert_eq!(store.pinned_count(), 0);
    }

    #[test]
    fn test_busy_scanner() {
        let store = Arc::new(MemoryStore::new());
        store
            .store_objects(&SetIdentifier::new("db", "in"), vec![Value::Int64(1)], 1)
            .unwrap();
        let server = server(store);
        let plan = copy_plan();
        let physical = server.plan(&plan, "job").unwrap();

        let lease = server.lease_scanner().unwrap();
        let result = server.execute_job_stage(&plan, &physical.stages[0]);
        assert!(!result.success);
        assert!(result.message.contains("scanner"));
        drop(lease);
        assert!(server.execute_job_stage(&plan, &physical.stages[0]).success);
    }

    #[test]
    fn test_failed_stage_is_reported() {
        let server = server(Arc::new(MemoryStore::new()));
        let results = server.execute(&copy_plan(), "job").unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].message.contains("does not exist"));
    }

    #[test]
    fn test_accumulator_grows_by_doubling() {
        let budget = MemoryBudget::new(1000);
        let mut grant = budget.try_reserve(100).unwrap();
        charge_accumulator(&mut grant, 150, "test").unwrap();
        assert_eq!(grant.size(), 200);
        charge_accumulator(&mut grant, 700, "test").unwrap();
        assert_eq!(grant.size(), 700);
        let err = charge_accumulator(&mut grant, 1200, "test").unwrap_err();
        assert!(matches!(
            err,
            Error::NotEnoughSpace {
                requested: 500,
                remaining: 300
            }
        ));
        assert_eq!(grant.size(), 700);
    }

    #[test]
    fn test_accumulator_takes_exact_growth_when_doubling_does_not_fit() {
        let context = RuntimeContext::new(150, 10);
        let mut grant = context.reserve(100).unwrap();
        charge_accumulator(&mut grant, 110, "test").unwrap();
        assert_eq!(grant.size(), 110);

        let err = charge_accumulator(&mut grant, 200, "test").unwrap_err();
        assert!(matches!(
            err,
            Error::NotEnoughSpace {
                requested: 90,
                remaining: 40
            }
        ));
        assert_eq!(grant.size(), 110);
    }
}
