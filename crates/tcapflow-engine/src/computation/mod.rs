//! User computations: the nodes of a computation graph.
//!
//! A computation knows three things about itself:
//!
//! - how to describe itself as TCAP, given the tuple sets its inputs produce
//!   ([`Computation::to_tcap`])
//! - which lambdas its TCAP statements refer to ([`Computation::lambdas`])
//! - which sources, sinks, join executors and mergers it contributes when a
//!   pipeline starts at, ends at, or probes one of its statements
//!
//! Every computation is named `{type}_{label}`, where the label is assigned
//! by the [`QueryGraphAnalyzer`](crate::QueryGraphAnalyzer) walk.

mod aggregate;
mod join;
mod multi_selection;
mod scan;
mod selection;
mod writer;

pub use aggregate::AggregationComp;
pub use join::JoinComp;
pub use multi_selection::MultiSelectionComp;
pub use scan::ScanUserSet;
pub use selection::SelectionComp;
pub use writer::WriteUserSet;

use std::fmt;
use std::sync::Arc;

use tcapflow_adapters::tcap::AtomicComputation;
use tcapflow_common::types::{SetIdentifier, TupleSpec};
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::{ComputeInfo, ComputeSink, ComputeSource, Lambda, SinkMerger, Stage};

/// Describes the tuple set an input computation produced, as seen by the
/// computation consuming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTupleSetSpecifier {
    /// Name of the produced tuple set.
    pub tuple_set: String,
    /// All columns of the produced tuple set.
    pub columns: Vec<String>,
    /// The column holding the computation's output object.
    pub added_column: String,
}

impl InputTupleSetSpecifier {
    /// Creates a specifier.
    pub fn new(
        tuple_set: impl Into<String>,
        columns: Vec<String>,
        added_column: impl Into<String>,
    ) -> Self {
        Self {
            tuple_set: tuple_set.into(),
            columns,
            added_column: added_column.into(),
        }
    }

    /// A specifier for a one-column tuple set.
    pub fn single(tuple_set: impl Into<String>, column: impl Into<String>) -> Self {
        let column = column.into();
        Self::new(tuple_set, vec![column.clone()], column)
    }

    fn spec(&self) -> String {
        tcap_spec(&self.tuple_set, &self.columns)
    }

    fn object(&self) -> String {
        tcap_spec(&self.tuple_set, std::slice::from_ref(&self.added_column))
    }
}

/// TCAP text emitted for one computation, plus the tuple set it ends in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcapFragment {
    /// One statement per line.
    pub text: String,
    /// What the computation's consumers will read.
    pub output: InputTupleSetSpecifier,
}

/// The sink side of a pipeline, resolved by the compute plan.
#[derive(Debug, Clone, Copy)]
pub struct SinkContext<'a> {
    /// The statement consuming the pipeline's last tuple set.
    pub consumer: &'a AtomicComputation,
    /// Schema of the pipeline's last tuple set.
    pub schema: &'a TupleSpec,
    /// Columns the consumer reads (its hash column, for joins).
    pub input: &'a TupleSpec,
    /// Columns the consumer keeps.
    pub projection: &'a TupleSpec,
    /// True when the pipeline feeds the right side of a join.
    pub right_side: bool,
}

/// A node of a user computation graph.
pub trait Computation: Send + Sync {
    /// The type name; computation names are `{type}_{label}`.
    fn computation_type(&self) -> &'static str;

    /// Upstream computations, in input-index order.
    fn inputs(&self) -> &[Arc<dyn Computation>];

    /// Emits this computation's TCAP statements.
    ///
    /// `inputs` holds one specifier per upstream computation, in
    /// input-index order.
    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment>;

    /// Lambdas referenced by the statements [`to_tcap`](Self::to_tcap)
    /// emits for the same label.
    fn lambdas(&self, label: usize) -> Vec<(String, Arc<dyn Lambda>)> {
        let _ = label;
        Vec::new()
    }

    /// Creates the source of a pipeline starting at `producer`'s output.
    fn compute_source(
        &self,
        producer: &AtomicComputation,
        info: Option<ComputeInfo>,
    ) -> Result<Box<dyn ComputeSource>> {
        let _ = info;
        Err(Error::NoSourceFound(producer.output_name().to_string()))
    }

    /// Creates the sink of a pipeline ending in one of this computation's
    /// statements.
    fn compute_sink(
        &self,
        ctx: &SinkContext<'_>,
        info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn ComputeSink>> {
        let _ = info;
        Err(Error::Unsupported(format!(
            "{} cannot terminate a pipeline at {}",
            self.computation_type(),
            ctx.consumer.output_name()
        )))
    }

    /// Creates the probe stage for one of this computation's JOIN
    /// statements.
    fn executor(
        &self,
        join: &AtomicComputation,
        schema: &TupleSpec,
        pipelined_is_right: bool,
        info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn Stage>> {
        let _ = (schema, pipelined_is_right, info);
        Err(Error::Unsupported(format!(
            "{} has no join executor for {}",
            self.computation_type(),
            join.output_name()
        )))
    }

    /// How partial sink outputs of this computation are merged.
    fn sink_merger(&self) -> Result<Arc<dyn SinkMerger>> {
        Err(Error::Unsupported(format!(
            "{} produces no mergeable output",
            self.computation_type()
        )))
    }

    /// The stored set this computation reads or writes, if any.
    fn set_identifier(&self) -> Option<&SetIdentifier> {
        None
    }
}

impl fmt::Debug for dyn Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("type", &self.computation_type())
            .field("inputs", &self.inputs().len())
            .finish()
    }
}

/// The name of the computation with `label`.
#[must_use]
pub fn computation_name(computation: &dyn Computation, label: usize) -> String {
    format!("{}_{label}", computation.computation_type())
}

fn tcap_spec(tuple_set: &str, columns: &[String]) -> String {
    format!("{tuple_set}({})", columns.join(", "))
}

fn expect_inputs(
    computation: &dyn Computation,
    inputs: &[InputTupleSetSpecifier],
    expected: usize,
) -> Result<()> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "{} takes {expected} inputs, {} given",
            computation.computation_type(),
            inputs.len()
        )))
    }
}

/// Appends `extra` to a copy of `columns`.
fn with_column(columns: &[String], extra: &str) -> Vec<String> {
    let mut out = columns.to_vec();
    out.push(extra.to_string());
    out
}

/// Emits the APPLY/FILTER pair shared by the selection computations and
/// returns the filtered tuple set, which keeps `input`'s columns.
fn selection_statements(
    text: &mut String,
    name: &str,
    label: usize,
    input: &InputTupleSetSpecifier,
) -> InputTupleSetSpecifier {
    let sel = format!("sel_{label}");
    let with_sel = format!("{name}_withSel");
    let filtered = format!("{name}_filtered");
    let with_sel_cols = with_column(&input.columns, &sel);

    text.push_str(&format!(
        "{} <= APPLY({}, {}, '{name}', 'selection_{label}')\n",
        tcap_spec(&with_sel, &with_sel_cols),
        input.object(),
        input.spec(),
    ));
    text.push_str(&format!(
        "{} <= FILTER({}, {}, '{name}')\n",
        tcap_spec(&filtered, &input.columns),
        tcap_spec(&with_sel, std::slice::from_ref(&sel)),
        tcap_spec(&with_sel, &input.columns),
    ));
    InputTupleSetSpecifier::new(filtered, input.columns.clone(), input.added_column.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specifier_rendering() {
        let spec = InputTupleSetSpecifier::new(
            "J",
            vec!["in_0".to_string(), "in_1".to_string()],
            "in_1",
        );
        assert_eq!(spec.spec(), "J(in_0, in_1)");
        assert_eq!(spec.object(), "J(in_1)");
    }

    #[test]
    fn test_selection_statements_keep_columns() {
        let mut text = String::new();
        let input = InputTupleSetSpecifier::single("A", "in_0");
        let out = selection_statements(&mut text, "SelectionComp_1", 1, &input);
        assert_eq!(out.tuple_set, "SelectionComp_1_filtered");
        assert_eq!(out.columns, vec!["in_0"]);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains(
            "SelectionComp_1_withSel(in_0, sel_1) <= APPLY(A(in_0), A(in_0), 'SelectionComp_1', 'selection_1')"
        ));
    }
}
