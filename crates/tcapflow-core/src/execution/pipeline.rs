//! Single-source, single-sink streaming pipelines.
//!
//! A [`Pipeline`] pulls batches from a [`ComputeSource`], pushes each one
//! through its stages in order, and writes the result through a
//! [`ComputeSink`] into page-sized output containers. Page management is
//! delegated to three callbacks supplied by the caller:
//!
//! - the allocator hands out a fresh [`AllocationBlock`] for the next page
//! - the flusher takes a filled page (block plus container)
//! - the discarder takes a page that ended up holding nothing
//!
//! When the sink reports that the current page is full, the pipeline flushes
//! the rows already written, allocates a fresh page and resumes at the first
//! unwritten row. Stages never see page boundaries.

use std::fmt;

use tcapflow_common::memory::AllocationBlock;
use tcapflow_common::utils::error::{Error, Result};

use super::stages::{Stage, StageKind};
use super::{ComputeSink, ComputeSource, Container, TupleSet, WriteProgress};

/// Hands out the block for the next output page.
pub type PageAllocator = Box<dyn FnMut() -> Result<AllocationBlock> + Send>;

/// Takes back a page that holds no data.
pub type PageDiscarder = Box<dyn FnMut(AllocationBlock) + Send>;

/// Takes a filled output page.
pub type PageFlusher = Box<dyn FnMut(OutputPage) -> Result<()> + Send>;

/// A finished output page.
#[derive(Debug)]
pub struct OutputPage {
    /// The block the page's contents were charged to.
    pub block: AllocationBlock,
    /// The page contents.
    pub container: Container,
}

/// Counters collected by one [`Pipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Batches pulled from the source.
    pub batches: usize,
    /// Rows pulled from the source.
    pub rows_in: usize,
    /// Rows handed to the sink.
    pub rows_out: usize,
    /// Pages passed to the flusher.
    pub pages_flushed: usize,
    /// Pages passed to the discarder.
    pub pages_discarded: usize,
    /// Page rotations caused by a full page.
    pub rotations: usize,
}

enum RunState {
    AwaitingPage,
    LoadedInput(TupleSet),
    StageStep(usize, TupleSet),
    FlushOutput { batch: TupleSet, row: usize },
    Done,
}

struct OpenPage {
    block: AllocationBlock,
    container: Container,
}

/// A compiled chain `source -> stages -> sink`.
pub struct Pipeline {
    source: Box<dyn ComputeSource>,
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn ComputeSink>,
    allocator: PageAllocator,
    discarder: PageDiscarder,
    flusher: PageFlusher,
}

impl Pipeline {
    /// Creates a pipeline with no stages.
    pub fn new(
        source: Box<dyn ComputeSource>,
        sink: Box<dyn ComputeSink>,
        allocator: PageAllocator,
        discarder: PageDiscarder,
        flusher: PageFlusher,
    ) -> Self {
        Self {
            source,
            stages: Vec::new(),
            sink,
            allocator,
            discarder,
            flusher,
        }
    }

    /// Appends a stage.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Kinds of the stages, in execution order.
    #[must_use]
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Name of the source.
    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Name of the sink.
    #[must_use]
    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Changes the maximum number of rows per batch.
    pub fn set_chunk_size(&mut self, rows: usize) {
        self.source.set_chunk_size(rows);
    }

    fn open_page(&mut self) -> Result<OpenPage> {
        Ok(OpenPage {
            block: (self.allocator)()?,
            container: self.sink.create_new_output_container(),
        })
    }

    fn close_page(&mut self, page: OpenPage, stats: &mut PipelineStats) -> Result<()> {
        if page.container.is_empty() {
            (self.discarder)(page.block);
            stats.pages_discarded += 1;
        } else {
            (self.flusher)(OutputPage {
                block: page.block,
                container: page.container,
            })?;
            stats.pages_flushed += 1;
        }
        Ok(())
    }

    /// Runs the pipeline until the source is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates failures of the source, any stage, the sink or the page
    /// callbacks. Fails with [`Error::NotEnoughSpace`] if a single row does
    /// not fit in a fresh page. Pages flushed before the failure stay
    /// flushed.
    pub fn run(&mut self) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        let mut page: Option<OpenPage> = None;
        let mut state = RunState::AwaitingPage;

        loop {
            state = match state {
                RunState::AwaitingPage => match self.source.next_tuple_set()? {
                    Some(batch) => {
                        stats.batches += 1;
                        stats.rows_in += batch.num_rows();
                        RunState::LoadedInput(batch)
                    }
                    None => RunState::Done,
                },
                RunState::LoadedInput(batch) => {
                    if page.is_none() {
                        page = Some(self.open_page()?);
                    }
                    RunState::StageStep(0, batch)
                }
                RunState::StageStep(i, batch) => match self.stages.get_mut(i) {
                    _ if batch.is_empty() => RunState::AwaitingPage,
                    Some(stage) => RunState::StageStep(i + 1, stage.process(batch)?),
                    None => RunState::FlushOutput { batch, row: 0 },
                },
                RunState::FlushOutput { batch, row } => {
                    let open = page
                        .as_mut()
                        .ok_or_else(|| Error::Internal("no output page is open".into()))?;
                    let progress = self.sink.write_out(
                        &batch,
                        row,
                        &mut open.container,
                        &mut open.block,
                    )?;
                    match progress {
                        WriteProgress::Complete => {
                            stats.rows_out += batch.num_rows();
                            RunState::AwaitingPage
                        }
                        WriteProgress::Full { next_row } => {
                            if next_row == row && open.block.is_empty() {
                                return Err(Error::NotEnoughSpace {
                                    requested: open.block.capacity() + 1,
                                    remaining: open.block.remaining(),
                                });
                            }
                            if let Some(full) = page.take() {
                                self.close_page(full, &mut stats)?;
                            }
                            page = Some(self.open_page()?);
                            stats.rotations += 1;
                            tracing::debug!(
                                "{}: output page full at row {}, rotated",
                                self.sink.name(),
                                next_row
                            );
                            RunState::FlushOutput {
                                batch,
                                row: next_row,
                            }
                        }
                    }
                }
                RunState::Done => {
                    if let Some(last) = page.take() {
                        self.close_page(last, &mut stats)?;
                    }
                    tracing::debug!(
                        "pipeline {} -> {} done: {} batches, {} rows in, {} rows out",
                        self.source.name(),
                        self.sink.name(),
                        stats.batches,
                        stats.rows_in,
                        stats.rows_out
                    );
                    return Ok(stats);
                }
            };
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source.name())
            .field("stages", &self.stage_kinds())
            .field("sink", &self.sink.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::stages::FilterStage;
    use crate::execution::ObjectSink;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tcapflow_common::memory::RuntimeContext;
    use tcapflow_common::types::Value;

    struct MockSource {
        batches: Vec<TupleSet>,
    }

    impl ComputeSource for MockSource {
        fn next_tuple_set(&mut self) -> Result<Option<TupleSet>> {
            if self.batches.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.batches.remove(0)))
            }
        }

        fn set_chunk_size(&mut self, _rows: usize) {}

        fn name(&self) -> &'static str {
            "MockSource"
        }
    }

    fn ints(range: std::ops::Range<i64>) -> TupleSet {
        TupleSet::from_column(range.map(Value::Int64).collect())
    }

    fn pipeline_with_pages(
        batches: Vec<TupleSet>,
        page_size: usize,
    ) -> (Pipeline, Arc<Mutex<Vec<Container>>>) {
        let ctx = RuntimeContext::new(1 << 24, page_size);
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink_pages = Arc::clone(&flushed);
        let pipeline = Pipeline::new(
            Box::new(MockSource { batches }),
            Box::new(ObjectSink::new(vec![0])),
            Box::new(move || ctx.allocate_block()),
            Box::new(|_block| {}),
            Box::new(move |page: OutputPage| {
                sink_pages.lock().push(page.container);
                Ok(())
            }),
        );
        (pipeline, flushed)
    }

    #[test]
    fn test_passthrough_fits_one_page() {
        let (mut pipeline, flushed) =
            pipeline_with_pages(vec![ints(0..10), ints(10..20)], 1 << 16);
        let stats = pipeline.run().unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.rows_in, 20);
        assert_eq!(stats.rows_out, 20);
        assert_eq!(stats.pages_flushed, 1);
        assert_eq!(stats.rotations, 0);
        assert_eq!(flushed.lock()[0].record_count(), 20);
    }

    #[test]
    fn test_overflow_rotates_once_per_full_page() {
        let per_row = Value::Int64(0).footprint();
        let (mut pipeline, flushed) = pipeline_with_pages(vec![ints(0..25)], per_row * 10);
        let stats = pipeline.run().unwrap();

        assert_eq!(stats.rotations, 2);
        assert_eq!(stats.pages_flushed, 3);
        let pages = flushed.lock();
        let counts: Vec<usize> = pages.iter().map(Container::record_count).collect();
        assert_eq!(counts, vec![10, 10, 5]);
    }

    #[test]
    fn test_empty_output_is_discarded() {
        let ctx = RuntimeContext::new(1 << 20, 1024);
        let discarded = Arc::new(Mutex::new(0_usize));
        let seen = Arc::clone(&discarded);
        let mut pipeline = Pipeline::new(
            Box::new(MockSource {
                batches: vec![
                    TupleSet::new(vec![vec![Value::Bool(false)], vec![Value::Int64(1)]]).unwrap(),
                ],
            }),
            Box::new(ObjectSink::new(vec![0])),
            Box::new(move || ctx.allocate_block()),
            Box::new(move |_block| *seen.lock() += 1),
            Box::new(|_page| Err(Error::Internal("nothing should be flushed".into()))),
        );
        pipeline.add_stage(Box::new(FilterStage::new(0, vec![1])));
        let stats = pipeline.run().unwrap();
        assert_eq!(stats.pages_discarded, 1);
        assert_eq!(stats.rows_out, 0);
        assert_eq!(*discarded.lock(), 1);
    }

    #[test]
    fn test_row_larger_than_page_fails() {
        let big = Value::from("x".repeat(512));
        let (mut pipeline, _) = pipeline_with_pages(vec![TupleSet::from_column(vec![big])], 64);
        assert!(matches!(
            pipeline.run(),
            Err(Error::NotEnoughSpace { .. })
        ));
    }

    #[test]
    fn test_no_input_allocates_nothing() {
        let mut pipeline = Pipeline::new(
            Box::new(MockSource { batches: vec![] }),
            Box::new(ObjectSink::new(vec![0])),
            Box::new(|| Err(Error::Internal("no page expected".into()))),
            Box::new(|_block| {}),
            Box::new(|_page| Ok(())),
        );
        let stats = pipeline.run().unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert_eq!(
            format!("{pipeline:?}"),
            "Pipeline { source: \"MockSource\", stages: [], sink: \"ObjectSink\" }"
        );
    }
}
