//! Tuple-set stages: pipelines over one path, run by the worker pool.

use std::sync::Arc;

use tcapflow_common::memory::RuntimeContext;
use tcapflow_common::types::SetIdentifier;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::buffer::{SharedPage, VecPageIterator};
use tcapflow_core::execution::{
    AggMap, AggregateArg, ComputeInfo, ComputeParams, JoinArg, PipelineStats, RowSource,
    ShuffleArg, ShuffleMode, SourceArg,
};
use tcapflow_core::hashset::JoinTable;
use tcapflow_core::workers::{CancellationToken, join_all};

use super::{ExecutionServer, SetStore, page_callbacks};
use crate::compute_plan::ComputePlan;
use crate::physical::{PipelineSink, PipelineSource, TupleSetJobStage};

/// What one pipeline reads.
pub(super) enum JobInput {
    /// Stored objects.
    Pages(Vec<SharedPage>),
    /// One partition of a materialized aggregation.
    Aggregates {
        maps: Arc<Vec<AggMap>>,
        partition: usize,
    },
    /// One partition of repartitioned rows.
    Rows {
        pages: Vec<SharedPage>,
        partition: usize,
        width: usize,
    },
}

/// Everything a worker needs to build and run its own pipeline.
#[derive(Clone)]
pub(super) struct PipelineJob {
    pub(super) plan: ComputePlan,
    pub(super) path: Vec<String>,
    pub(super) target: String,
    pub(super) sink_set: SetIdentifier,
    pub(super) shuffle: Option<ShuffleArg>,
    pub(super) probes: Vec<(String, JoinTable)>,
    pub(super) batch_size: usize,
    pub(super) context: RuntimeContext,
    pub(super) store: Arc<dyn SetStore>,
}

impl PipelineJob {
    fn params(&self) -> ComputeParams {
        let mut params = ComputeParams::new();
        for (tuple_set, table) in &self.probes {
            params.insert(
                tuple_set.clone(),
                ComputeInfo::Join(JoinArg {
                    table: table.clone(),
                }),
            );
        }
        if let (Some(shuffle), Some(last)) = (self.shuffle, self.path.last()) {
            params.insert(last.clone(), ComputeInfo::Shuffle(shuffle));
        }
        params
    }

    /// Builds the pipeline for `input` and runs it to completion.
    pub(super) fn run(self, input: JobInput) -> Result<PipelineStats> {
        let first = self
            .path
            .first()
            .cloned()
            .ok_or_else(|| Error::execution("a tuple-set stage needs a non-empty path"))?;
        let mut params = self.params();
        let (allocator, discarder, flusher) =
            page_callbacks(&self.context, &self.store, self.sink_set.clone());

        let mut pipeline = match input {
            JobInput::Pages(pages) => {
                params.insert(
                    first,
                    ComputeInfo::Source(SourceArg {
                        pages: Box::new(VecPageIterator::new(pages)),
                        batch_size: self.batch_size,
                        partition: None,
                    }),
                );
                self.plan
                    .build_pipeline(&self.path, &self.target, allocator, discarder, flusher, params)?
            }
            JobInput::Aggregates { maps, partition } => {
                params.insert(
                    first,
                    ComputeInfo::Aggregates(AggregateArg {
                        maps,
                        partition: Some(partition),
                        batch_size: self.batch_size,
                    }),
                );
                self.plan
                    .build_pipeline(&self.path, &self.target, allocator, discarder, flusher, params)?
            }
            JobInput::Rows {
                pages,
                partition,
                width,
            } => {
                let source = Box::new(RowSource::new(
                    Box::new(VecPageIterator::new(pages)),
                    partition,
                    width,
                    self.batch_size,
                ));
                self.plan.build_pipeline_from_source(
                    source,
                    &self.path,
                    &self.target,
                    allocator,
                    discarder,
                    flusher,
                    params,
                )?
            }
        };
        pipeline.run()
    }
}

/// Runs one pipeline per input on the worker pool and sums their counters.
pub(super) fn run_all(
    server: &ExecutionServer,
    job: &PipelineJob,
    inputs: Vec<JobInput>,
) -> Result<PipelineStats> {
    let token = CancellationToken::new();
    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let job = job.clone();
        handles.push(
            server
                .pool()
                .execute_cancellable(&token, move || job.run(input))?,
        );
    }
    let stats = join_all(handles)?;
    Ok(stats.into_iter().fold(PipelineStats::default(), |acc, s| PipelineStats {
        batches: acc.batches + s.batches,
        rows_in: acc.rows_in + s.rows_in,
        rows_out: acc.rows_out + s.rows_out,
        pages_flushed: acc.pages_flushed + s.pages_flushed,
        pages_discarded: acc.pages_discarded + s.pages_discarded,
        rotations: acc.rotations + s.rotations,
    }))
}

fn shuffle_of(sink: &PipelineSink) -> Option<ShuffleArg> {
    match *sink {
        PipelineSink::Set { .. } | PipelineSink::BroadcastData { .. } => None,
        PipelineSink::HashPartitionedData { num_partitions, .. }
        | PipelineSink::AggregationData { num_partitions, .. } => Some(ShuffleArg {
            num_partitions,
            mode: ShuffleMode::BuildHashTable,
        }),
        PipelineSink::Repartition { num_partitions, .. } => Some(ShuffleArg {
            num_partitions,
            mode: ShuffleMode::Repartition,
        }),
    }
}

/// Spreads `pages` round-robin over at most `workers` buckets.
fn split_pages(pages: Vec<SharedPage>, workers: usize) -> Vec<Vec<SharedPage>> {
    let workers = workers.min(pages.len()).max(1);
    let mut buckets = vec![Vec::new(); workers];
    for (i, page) in pages.into_iter().enumerate() {
        buckets[i % workers].push(page);
    }
    buckets
}

pub(super) fn run(
    server: &ExecutionServer,
    plan: &ComputePlan,
    stage: &TupleSetJobStage,
) -> Result<PipelineStats> {
    let store = server.store();
    store.create_set(stage.sink.set())?;

    let probes = stage
        .probes
        .iter()
        .map(|probe| {
            let table = server.hash_sets().require(&probe.hash_set)?.join_table()?;
            Ok((probe.tuple_set.clone(), table))
        })
        .collect::<Result<Vec<_>>>()?;

    let job = PipelineJob {
        plan: plan.clone(),
        path: stage.path.clone(),
        target: stage.target_computation.clone(),
        sink_set: stage.sink.set().clone(),
        shuffle: shuffle_of(&stage.sink),
        probes,
        batch_size: server.config().batch_size,
        context: server.context().clone(),
        store: Arc::clone(store),
    };

    let inputs: Vec<JobInput> = match &stage.source {
        PipelineSource::Set { set } => {
            split_pages(store.pinned_pages(set)?, server.pool().size())
                .into_iter()
                .map(JobInput::Pages)
                .collect()
        }
        PipelineSource::AggregationResult { hash_set } => {
            let maps = server.hash_sets().require(hash_set)?.aggregates()?;
            (0..maps.len())
                .map(|partition| JobInput::Aggregates {
                    maps: Arc::clone(&maps),
                    partition,
                })
                .collect()
        }
        PipelineSource::Repartitioned {
            set,
            num_partitions,
        } => {
            let first = stage
                .path
                .first()
                .ok_or_else(|| Error::execution("a tuple-set stage needs a non-empty path"))?;
            let width = plan
                .get_plan()?
                .computations()
                .require_producer(first)?
                .output
                .atts()
                .len();
            let pages = store.pinned_pages(set)?;
            (0..*num_partitions)
                .map(|partition| JobInput::Rows {
                    pages: pages.clone(),
                    partition,
                    width,
                })
                .collect()
        }
    };

    tracing::debug!(
        "stage {}: {} over {} ({} pipelines)",
        stage.id,
        stage.source,
        stage.path.join(" -> "),
        inputs.len()
    );
    run_all(server, &job, inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcapflow_core::buffer::{Page, PinnedPage};
    use tcapflow_core::execution::Container;
    use tcapflow_common::types::PageId;

    fn pages(n: u64) -> Vec<SharedPage> {
        (0..n)
            .map(|i| {
                PinnedPage::unmanaged(
                    Page::encode(PageId(i), &Container::Objects(Vec::new())).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_split_pages_round_robin() {
        let buckets = split_pages(pages(5), 2);
        assert_eq!(buckets.len(), 2);
        let ids: Vec<u64> = buckets[1].iter().map(|p| p.page().id().0).collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(split_pages(pages(2), 8).len(), 2);
        assert_eq!(split_pages(Vec::new(), 4).len(), 1);
    }

    #[test]
    fn test_shuffle_follows_sink() {
        let set = SetIdentifier::new("job", "x");
        assert!(shuffle_of(&PipelineSink::Set { set: set.clone() }).is_none());
        let arg = shuffle_of(&PipelineSink::Repartition {
            set,
            num_partitions: 3,
        })
        .unwrap();
        assert_eq!(arg.num_partitions, 3);
        assert_eq!(arg.mode, ShuffleMode::Repartition);
    }
}
