//! Compute plans: TCAP text plus computations, compiled on demand into
//! pipelines.
//!
//! A pipeline covers a path of tuple sets through the parsed program:
//!
//! ```text
//! path[0] --stage--> path[1] --stage--> ... --stage--> path[n-1] --> sink
//! ```
//!
//! `path[0]` is produced by a SCAN (or an AGGREGATE whose result was
//! materialized) and supplies the source. Every later element is produced by
//! a statement reading the previous one, and compiles into one stage. The
//! sink is the statement of the target computation that consumes the last
//! tuple set.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tcapflow_adapters::tcap::{AtomicComputation, AtomicComputationList, AtomicOp};
use tcapflow_common::types::TupleSpec;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::stages::{FilterStage, FlattenStage, HashStage};
use tcapflow_core::execution::{
    ComputeParams, ComputeSource, PageAllocator, PageDiscarder, PageFlusher, Pipeline,
    SinkMerger, Stage, StageKind,
};

use crate::analyzer::QueryGraphAnalyzer;
use crate::computation::{Computation, SinkContext};
use crate::plan::LogicalPlan;

/// TCAP text plus the computations it was generated from.
///
/// The [`LogicalPlan`] is compiled on the first [`get_plan`](Self::get_plan)
/// and cached. Clones never share the cache: every worker clones the plan
/// and compiles its own copy.
pub struct ComputePlan {
    tcap: String,
    computations: Vec<Arc<dyn Computation>>,
    plan: Mutex<Option<Arc<LogicalPlan>>>,
}

impl ComputePlan {
    /// Creates a plan; computation `i` must be the one labelled `i` in
    /// `tcap`.
    pub fn new(tcap: impl Into<String>, computations: Vec<Arc<dyn Computation>>) -> Self {
        Self {
            tcap: tcap.into(),
            computations,
            plan: Mutex::new(None),
        }
    }

    /// Analyzes the graph ending in `sinks` and wraps the result.
    ///
    /// # Errors
    ///
    /// Fails if the graph cannot be turned into TCAP.
    pub fn from_sinks(sinks: Vec<Arc<dyn Computation>>) -> Result<Self> {
        let graph = QueryGraphAnalyzer::new(sinks).analyze()?;
        Ok(Self::new(graph.tcap, graph.computations))
    }

    /// The TCAP program.
    #[must_use]
    pub fn tcap(&self) -> &str {
        &self.tcap
    }

    /// The computations, by label.
    #[must_use]
    pub fn computations(&self) -> &[Arc<dyn Computation>] {
        &self.computations
    }

    /// Returns the compiled plan, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the program does not parse or does not match the
    /// computations.
    pub fn get_plan(&self) -> Result<Arc<LogicalPlan>> {
        let mut cached = self.plan.lock();
        if let Some(plan) = cached.as_ref() {
            return Ok(Arc::clone(plan));
        }
        let plan = Arc::new(LogicalPlan::build(&self.tcap, &self.computations)?);
        *cached = Some(Arc::clone(&plan));
        Ok(plan)
    }

    /// Drops the compiled plan. The next [`get_plan`](Self::get_plan)
    /// compiles again.
    pub fn nullify_plan_pointer(&self) {
        self.plan.lock().take();
    }

    /// Returns true if a compiled plan is cached.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.plan.lock().is_some()
    }

    /// Builds the pipeline covering `path` and ending in `target`.
    ///
    /// `params` entries are looked up by tuple-set name: the source takes the
    /// entry for `path[0]`, each join stage the entry for the tuple set it
    /// produces, and the sink the entry for the last tuple set.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSourceFound`] if `path[0]` is not produced by a SCAN or
    ///   AGGREGATE
    /// - [`Error::UnresolvedTupleSet`] if a path element has no producer
    /// - [`Error::NoSinkFound`] if `target` does not consume the last tuple
    ///   set
    /// - [`Error::AmbiguousJoinSide`] if a join consumer matches neither side
    pub fn build_pipeline<S: AsRef<str>>(
        &self,
        path: &[S],
        target: &str,
        allocator: PageAllocator,
        discarder: PageDiscarder,
        flusher: PageFlusher,
        mut params: ComputeParams,
    ) -> Result<Pipeline> {
        let plan = self.get_plan()?;
        let path: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
        let first = *path
            .first()
            .ok_or_else(|| Error::execution("a pipeline path needs at least one tuple set"))?;
        let producer = plan.computations().require_producer(first)?;
        if !matches!(producer.op, AtomicOp::Scan { .. } | AtomicOp::Aggregate) {
            return Err(Error::NoSourceFound(first.to_string()));
        }
        let source = plan
            .computation(&producer.computation_name)?
            .compute_source(producer, params.remove(first))?;
        assemble(&plan, source, &path, target, allocator, discarder, flusher, &params)
    }

    /// Like [`build_pipeline`](Self::build_pipeline), but reads from a
    /// caller-supplied source instead of `path[0]`'s producer. Used for
    /// probe pipelines fed by repartitioned rows.
    ///
    /// # Errors
    ///
    /// As [`build_pipeline`](Self::build_pipeline), minus the source checks.
    pub fn build_pipeline_from_source<S: AsRef<str>>(
        &self,
        source: Box<dyn ComputeSource>,
        path: &[S],
        target: &str,
        allocator: PageAllocator,
        discarder: PageDiscarder,
        flusher: PageFlusher,
        params: ComputeParams,
    ) -> Result<Pipeline> {
        let plan = self.get_plan()?;
        let path: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
        assemble(&plan, source, &path, target, allocator, discarder, flusher, &params)
    }

    /// The merger for partial sink outputs of `target_computation`.
    ///
    /// # Errors
    ///
    /// Fails if the computation is unknown or produces nothing mergeable.
    pub fn get_merger(&self, target_computation: &str) -> Result<Arc<dyn SinkMerger>> {
        self.get_plan()?
            .computation(target_computation)?
            .sink_merger()
    }
}

impl Clone for ComputePlan {
    fn clone(&self) -> Self {
        Self::new(self.tcap.clone(), self.computations.clone())
    }
}

impl fmt::Debug for ComputePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePlan")
            .field("statements", &self.tcap.lines().count())
            .field("computations", &self.computations.len())
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// One step of a pipeline path: a statement and the schema it reads.
struct PathStep<'a> {
    statement: &'a AtomicComputation,
    schema: &'a TupleSpec,
    pipelined_is_right: bool,
}

fn walk_path<'a>(list: &'a AtomicComputationList, path: &[&str]) -> Result<Vec<PathStep<'a>>> {
    if let Some(first) = path.first() {
        list.require_producer(first)?;
    }
    path.windows(2)
        .map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            let statement = list.require_producer(next)?;
            if !statement.input_names().any(|name| name == prev) {
                return Err(Error::execution(format!(
                    "'{next}' does not read '{prev}', so they cannot be chained"
                )));
            }
            let pipelined_is_right = match &statement.op {
                AtomicOp::Join { right_input, .. } => {
                    statement.input.set_name() != prev && right_input.set_name() == prev
                }
                _ => false,
            };
            Ok(PathStep {
                statement,
                schema: &list.require_producer(prev)?.output,
                pipelined_is_right,
            })
        })
        .collect()
}

fn resolve_sink<'a>(
    list: &'a AtomicComputationList,
    last: &str,
    target: &str,
) -> Result<SinkContext<'a>> {
    let schema = &list.require_producer(last)?.output;
    let consumer = list
        .consumers(last)
        .into_iter()
        .find(|c| {
            c.computation_name == target
                && matches!(
                    c.op,
                    AtomicOp::Join { .. } | AtomicOp::Aggregate | AtomicOp::Output { .. }
                )
        })
        .ok_or_else(|| Error::NoSinkFound {
            tuple_set: last.to_string(),
            computation: target.to_string(),
        })?;

    if consumer.input.set_name() == last {
        let projection = if consumer.projection.is_empty() {
            &consumer.input
        } else {
            &consumer.projection
        };
        return Ok(SinkContext {
            consumer,
            schema,
            input: &consumer.input,
            projection,
            right_side: false,
        });
    }
    match &consumer.op {
        AtomicOp::Join {
            right_input,
            right_projection,
        } if right_input.set_name() == last => Ok(SinkContext {
            consumer,
            schema,
            input: right_input,
            projection: right_projection,
            right_side: true,
        }),
        _ => Err(Error::AmbiguousJoinSide {
            computation: target.to_string(),
            tuple_set: last.to_string(),
        }),
    }
}

fn stage_kind(op: &AtomicOp) -> Result<StageKind> {
    match op {
        AtomicOp::Apply { .. } => Ok(StageKind::Apply),
        AtomicOp::Filter => Ok(StageKind::Filter),
        AtomicOp::HashLeft { .. } => Ok(StageKind::HashLeft),
        AtomicOp::HashRight { .. } => Ok(StageKind::HashRight),
        AtomicOp::HashOne => Ok(StageKind::HashOne),
        AtomicOp::Flatten => Ok(StageKind::Flatten),
        AtomicOp::Join { .. } => Ok(StageKind::Join),
        AtomicOp::Scan { .. } | AtomicOp::Aggregate | AtomicOp::Output { .. } => {
            Err(not_a_stage(op))
        }
    }
}

fn not_a_stage(op: &AtomicOp) -> Error {
    Error::Unsupported(format!("{} cannot run inside a pipeline", op.name()))
}

fn compile_stage(
    plan: &LogicalPlan,
    step: &PathStep<'_>,
    params: &ComputeParams,
) -> Result<Box<dyn Stage>> {
    let s = step.statement;
    let schema = step.schema;
    match &s.op {
        AtomicOp::Apply { lambda } => {
            plan.lambda(&s.computation_name, lambda)?
                .executor(schema, &s.input, &s.projection)
        }
        AtomicOp::HashLeft { lambda } => {
            plan.lambda(&s.computation_name, lambda)?
                .left_hasher(schema, &s.input, &s.projection)
        }
        AtomicOp::HashRight { lambda } => {
            plan.lambda(&s.computation_name, lambda)?
                .right_hasher(schema, &s.input, &s.projection)
        }
        AtomicOp::Filter => Ok(Box::new(FilterStage::new(
            s.input.single_position_in(schema)?,
            s.projection.positions_in(schema)?,
        ))),
        AtomicOp::HashOne => Ok(Box::new(HashStage::new(
            StageKind::HashOne,
            s.input.single_position_in(schema)?,
            s.projection.positions_in(schema)?,
        )?)),
        AtomicOp::Flatten => Ok(Box::new(FlattenStage::new(
            s.input.single_position_in(schema)?,
            s.projection.positions_in(schema)?,
        ))),
        AtomicOp::Join { .. } => plan.computation(&s.computation_name)?.executor(
            s,
            schema,
            step.pipelined_is_right,
            params.get(s.output_name()),
        ),
        AtomicOp::Scan { .. } | AtomicOp::Aggregate | AtomicOp::Output { .. } => {
            Err(not_a_stage(&s.op))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    plan: &LogicalPlan,
    source: Box<dyn ComputeSource>,
    path: &[&str],
    target: &str,
    allocator: PageAllocator,
    discarder: PageDiscarder,
    flusher: PageFlusher,
    params: &ComputeParams,
) -> Result<Pipeline> {
    let list = plan.computations();
    let steps = walk_path(list, path)?;
    let last = *path
        .last()
        .ok_or_else(|| Error::execution("a pipeline path needs at least one tuple set"))?;
    let ctx = resolve_sink(list, last, target)?;
    let sink = plan
        .computation(target)?
        .compute_sink(&ctx, params.get(last))?;

    let mut pipeline = Pipeline::new(source, sink, allocator, discarder, flusher);
    for step in &steps {
        pipeline.add_stage(compile_stage(plan, step, params)?);
    }
    tracing::debug!(
        "built pipeline {} -> [{}] -> {} ({})",
        pipeline.source_name(),
        path.join(", "),
        pipeline.sink_name(),
        target
    );
    Ok(pipeline)
}

/// What a pipeline over a path would look like, without building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineShape {
    /// The statement producing `path[0]`.
    pub source: String,
    /// Stage kinds, in execution order.
    pub stages: Vec<StageKind>,
    /// The statement the pipeline ends in.
    pub sink: String,
    /// True when the pipeline feeds the right side of a join.
    pub right_side: bool,
}

/// Resolves the source, stages and sink of a pipeline over `path` ending in
/// `target`, using the same rules as [`ComputePlan::build_pipeline`].
///
/// # Errors
///
/// The structural errors of [`ComputePlan::build_pipeline`].
pub fn describe_pipeline<S: AsRef<str>>(
    list: &AtomicComputationList,
    path: &[S],
    target: &str,
) -> Result<PipelineShape> {
    let path: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
    let first = *path
        .first()
        .ok_or_else(|| Error::execution("a pipeline path needs at least one tuple set"))?;
    let source = list.require_producer(first)?;
    let stages = walk_path(list, &path)?
        .iter()
        .map(|step| stage_kind(&step.statement.op))
        .collect::<Result<Vec<_>>>()?;
    let last = *path.last().unwrap_or(&first);
    let sink = resolve_sink(list, last, target)?;
    Ok(PipelineShape {
        source: format!("{} {}", source.op.name(), source.output_name()),
        stages,
        sink: format!("{} {}", sink.consumer.op.name(), sink.consumer.output_name()),
        right_side: sink.right_side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{ScanUserSet, SelectionComp, WriteUserSet};
    use parking_lot::Mutex as PlMutex;
    use tcapflow_common::memory::RuntimeContext;
    use tcapflow_common::types::{PageId, Value};
    use tcapflow_core::buffer::{Page, PinnedPage, VecPageIterator};
    use tcapflow_core::execution::{ComputeInfo, Container, FnLambda, SourceArg};

    fn selection_plan() -> ComputePlan {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "in"));
        let sel: Arc<dyn Computation> = Arc::new(SelectionComp::new(
            scan,
            FnLambda::unary(|v: &Value| Ok(Value::Bool(v.as_int64().unwrap_or(0) % 2 == 0))),
            FnLambda::unary(|v: &Value| Ok(Value::Int64(v.as_int64().unwrap_or(0) * 10))),
        ));
        let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(sel, "db", "out"));
        ComputePlan::from_sinks(vec![out]).unwrap()
    }

    fn selection_path() -> Vec<&'static str> {
        vec![
            "inputDataForScanUserSet_0",
            "SelectionComp_1_withSel",
            "SelectionComp_1_filtered",
            "SelectionComp_1_out",
        ]
    }

    fn callbacks(
        ctx: &RuntimeContext,
        flushed: Arc<PlMutex<Vec<Container>>>,
    ) -> (PageAllocator, PageDiscarder, PageFlusher) {
        let ctx = ctx.clone();
        (
            Box::new(move || ctx.allocate_block()),
            Box::new(|_| {}),
            Box::new(move |page| {
                flushed.lock().push(page.container);
                Ok(())
            }),
        )
    }

    fn source_params(values: Vec<Value>) -> ComputeParams {
        let page = Page::encode(PageId(0), &Container::Objects(values)).unwrap();
        let mut params = ComputeParams::new();
        params.insert(
            "inputDataForScanUserSet_0".to_string(),
            ComputeInfo::Source(SourceArg {
                pages: Box::new(VecPageIterator::new(vec![PinnedPage::unmanaged(page)])),
                batch_size: 16,
                partition: None,
            }),
        );
        params
    }

    #[test]
    fn test_plan_is_cached_and_nullified() {
        let plan = selection_plan();
        assert!(!plan.is_compiled());
        let first = plan.get_plan().unwrap();
        let second = plan.get_plan().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        plan.nullify_plan_pointer();
        assert!(!plan.is_compiled());
        let third = plan.get_plan().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_clone_does_not_share_compiled_plan() {
        let plan = selection_plan();
        plan.get_plan().unwrap();
        let copy = plan.clone();
        assert!(!copy.is_compiled());
        assert_eq!(copy.tcap(), plan.tcap());
    }

    #[test]
    fn test_selection_pipeline_runs() {
        let plan = selection_plan();
        let ctx = RuntimeContext::new(1 << 20, 4096);
        let flushed = Arc::new(PlMutex::new(Vec::new()));
        let (alloc, discard, flush) = callbacks(&ctx, Arc::clone(&flushed));

        let mut pipeline = plan
            .build_pipeline(
                &selection_path(),
                "Output_2",
                alloc,
                discard,
                flush,
                source_params((0..10).map(Value::Int64).collect()),
            )
            .unwrap();
        assert_eq!(
            pipeline.stage_kinds(),
            vec![StageKind::Apply, StageKind::Filter, StageKind::Apply]
        );
        pipeline.run().unwrap();

        let objects: Vec<Value> = flushed
            .lock()
            .drain(..)
            .flat_map(|c| c.into_objects().unwrap())
            .collect();
        assert_eq!(objects, [0, 20, 40, 60, 80].map(Value::Int64).to_vec());
    }

    #[test]
    fn test_missing_source_params_fail() {
        let plan = selection_plan();
        let ctx = RuntimeContext::new(1 << 20, 4096);
        let (alloc, discard, flush) = callbacks(&ctx, Arc::new(PlMutex::new(Vec::new())));
        let err = plan
            .build_pipeline(
                &selection_path(),
                "Output_2",
                alloc,
                discard,
                flush,
                ComputeParams::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Execution(msg) if msg.contains("no pages")));
    }

    #[test]
    fn test_non_source_start_rejected() {
        let plan = selection_plan();
        let ctx = RuntimeContext::new(1 << 20, 4096);
        let (alloc, discard, flush) = callbacks(&ctx, Arc::new(PlMutex::new(Vec::new())));
        let err = plan
            .build_pipeline(
                &["SelectionComp_1_withSel", "SelectionComp_1_filtered"],
                "Output_2",
                alloc,
                discard,
                flush,
                ComputeParams::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSourceFound(name) if name == "SelectionComp_1_withSel"));
    }

    #[test]
    fn test_wrong_target_has_no_sink() {
        let list = selection_plan().get_plan().unwrap();
        let err = describe_pipeline(list.computations(), &selection_path(), "SelectionComp_1")
            .unwrap_err();
        assert!(matches!(err, Error::NoSinkFound { .. }));
    }

    #[test]
    fn test_unchained_path_rejected() {
        let list = selection_plan().get_plan().unwrap();
        let err = describe_pipeline(
            list.computations(),
            &["inputDataForScanUserSet_0", "SelectionComp_1_out"],
            "Output_2",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[test]
    fn test_unknown_path_element_rejected() {
        let list = selection_plan().get_plan().unwrap();
        let err = describe_pipeline(list.computations(), &["nowhere"], "Output_2").unwrap_err();
        assert!(matches!(err, Error::UnresolvedTupleSet { .. }));
    }

    #[test]
    fn test_describe_matches_built_pipeline() {
        let plan = selection_plan();
        let logical = plan.get_plan().unwrap();
        let shape =
            describe_pipeline(logical.computations(), &selection_path(), "Output_2").unwrap();
        assert_eq!(shape.source, "Scan inputDataForScanUserSet_0");
        assert_eq!(shape.sink, "Output out_2");
        assert!(!shape.right_side);
        assert_eq!(shape.stages.len(), 3);
    }

    #[test]
    fn test_merger_for_output_unsupported() {
        let plan = selection_plan();
        assert!(matches!(plan.get_merger("Output_2"), Err(Error::Unsupported(_))));
        assert!(matches!(
            plan.get_merger("JoinComp_9"),
            Err(Error::UnknownComputation(_))
        ));
    }
}
