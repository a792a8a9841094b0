//! Two-input equi-join.

use std::sync::Arc;

use tcapflow_adapters::tcap::{AtomicComputation, AtomicOp};
use tcapflow_common::types::TupleSpec;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::stages::JoinProbeStage;
use tcapflow_core::execution::{
    ComputeInfo, ComputeSink, EqualsLambda, JoinMapSink, JoinSinkMerger, Lambda,
    PartitionedJoinMapSink, RepartitionSink, ShuffleArg, ShuffleMode, SinkMerger, Stage,
};

use super::{
    Computation, InputTupleSetSpecifier, SinkContext, TcapFragment, computation_name,
    expect_inputs, tcap_spec, with_column,
};

/// Joins two inputs on `left_key(l) == right_key(r)` and maps every match
/// through `projection(l, r)`.
///
/// The JOIN statement matches on key hashes only, so the generated TCAP
/// recomputes both keys afterwards and filters on equality.
pub struct JoinComp {
    inputs: [Arc<dyn Computation>; 2],
    left_key: Arc<dyn Lambda>,
    right_key: Arc<dyn Lambda>,
    projection: Arc<dyn Lambda>,
}

impl JoinComp {
    /// Creates a join. `projection` takes two arguments: the left and the
    /// right object.
    pub fn new(
        left: Arc<dyn Computation>,
        right: Arc<dyn Computation>,
        left_key: impl Lambda + 'static,
        right_key: impl Lambda + 'static,
        projection: impl Lambda + 'static,
    ) -> Self {
        Self {
            inputs: [left, right],
            left_key: Arc::new(left_key),
            right_key: Arc::new(right_key),
            projection: Arc::new(projection),
        }
    }
}

fn join_sides(join: &AtomicComputation) -> Result<(&TupleSpec, &TupleSpec)> {
    match &join.op {
        AtomicOp::Join {
            right_input,
            right_projection,
        } => Ok((right_input, right_projection)),
        other => Err(Error::type_mismatch("JoinSets", other.name())),
    }
}

impl Computation for JoinComp {
    fn computation_type(&self) -> &'static str {
        "JoinComp"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &self.inputs
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 2)?;
        let (left, right) = (&inputs[0], &inputs[1]);
        // Right-side columns also present on the left (a self join, or two
        // branches of one input) are renamed once they leave the right input.
        let alias = |c: &String| {
            if left.columns.contains(c) {
                format!("{c}_r{label}")
            } else {
                c.clone()
            }
        };
        let right_columns: Vec<String> = right.columns.iter().map(alias).collect();
        let right_added = alias(&right.added_column);

        let name = computation_name(self, label);
        let (lkey, rkey) = (format!("lkey_{label}"), format!("rkey_{label}"));
        let (lhash, rhash) = (format!("lhash_{label}"), format!("rhash_{label}"));
        let eq = format!("eq_{label}");
        let mut text = String::new();
        let mut line = |s: String| {
            text.push_str(&s);
            text.push('\n');
        };

        let lkeyed = format!("{name}_lkey");
        let lhashed = format!("{name}_lhashed");
        line(format!(
            "{} <= APPLY({}, {}, '{name}', 'left_key_{label}')",
            tcap_spec(&lkeyed, &with_column(&left.columns, &lkey)),
            left.object(),
            left.spec(),
        ));
        line(format!(
            "{} <= HASHLEFT({}, {}, '{name}', '=={label}')",
            tcap_spec(&lhashed, &with_column(&left.columns, &lhash)),
            tcap_spec(&lkeyed, std::slice::from_ref(&lkey)),
            tcap_spec(&lkeyed, &left.columns),
        ));

        let rkeyed = format!("{name}_rkey");
        let rhashed = format!("{name}_rhashed");
        line(format!(
            "{} <= APPLY({}, {}, '{name}', 'right_key_{label}')",
            tcap_spec(&rkeyed, &with_column(&right_columns, &rkey)),
            right.object(),
            right.spec(),
        ));
        line(format!(
            "{} <= HASHRIGHT({}, {}, '{name}', '=={label}')",
            tcap_spec(&rhashed, &with_column(&right_columns, &rhash)),
            tcap_spec(&rkeyed, std::slice::from_ref(&rkey)),
            tcap_spec(&rkeyed, &right_columns),
        ));

        let both: Vec<String> = left.columns.iter().chain(&right_columns).cloned().collect();
        let joined = format!("{name}_joined");
        line(format!(
            "{} <= JOIN({}, {}, {}, {}, '{name}')",
            tcap_spec(&joined, &both),
            tcap_spec(&lhashed, std::slice::from_ref(&lhash)),
            tcap_spec(&lhashed, &left.columns),
            tcap_spec(&rhashed, std::slice::from_ref(&rhash)),
            tcap_spec(&rhashed, &right_columns),
        ));

        // Hash equality is not key equality: re-extract both keys and compare.
        let lcheck = format!("{name}_lcheck");
        let with_lkey = with_column(&both, &lkey);
        line(format!(
            "{} <= APPLY({}, {}, '{name}', 'left_key_{label}')",
            tcap_spec(&lcheck, &with_lkey),
            tcap_spec(&joined, std::slice::from_ref(&left.added_column)),
            tcap_spec(&joined, &both),
        ));
        let rcheck = format!("{name}_rcheck");
        line(format!(
            "{} <= APPLY({}, {}, '{name}', 'right_key_{label}')",
            tcap_spec(&rcheck, &with_column(&with_lkey, &rkey)),
            tcap_spec(&lcheck, std::slice::from_ref(&right_added)),
            tcap_spec(&lcheck, &with_lkey),
        ));
        let compared = format!("{name}_eq");
        line(format!(
            "{} <= APPLY({}, {}, '{name}', '=={label}')",
            tcap_spec(&compared, &with_column(&both, &eq)),
            tcap_spec(&rcheck, &[lkey.clone(), rkey.clone()]),
            tcap_spec(&rcheck, &both),
        ));
        let matched = format!("{name}_matched");
        line(format!(
            "{} <= FILTER({}, {}, '{name}')",
            tcap_spec(&matched, &both),
            tcap_spec(&compared, std::slice::from_ref(&eq)),
            tcap_spec(&compared, &both),
        ));

        let output = InputTupleSetSpecifier::single(format!("{name}_out"), format!("out_{label}"));
        line(format!(
            "{} <= APPLY({}, {matched}(), '{name}', 'projection_{label}')",
            output.spec(),
            tcap_spec(
                &matched,
                &[left.added_column.clone(), right_added]
            ),
        ));
        Ok(TcapFragment { text, output })
    }

    fn lambdas(&self, label: usize) -> Vec<(String, Arc<dyn Lambda>)> {
        vec![
            (format!("left_key_{label}"), Arc::clone(&self.left_key)),
            (format!("right_key_{label}"), Arc::clone(&self.right_key)),
            (format!("=={label}"), Arc::new(EqualsLambda)),
            (format!("projection_{label}"), Arc::clone(&self.projection)),
        ]
    }

    fn compute_sink(
        &self,
        ctx: &SinkContext<'_>,
        info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn ComputeSink>> {
        join_sides(ctx.consumer)?;
        let hash = ctx.input.single_position_in(ctx.schema)?;
        match info {
            None => Ok(Box::new(JoinMapSink::new(
                hash,
                ctx.projection.positions_in(ctx.schema)?,
            ))),
            Some(ComputeInfo::Shuffle(ShuffleArg {
                num_partitions,
                mode: ShuffleMode::BuildHashTable,
            })) => Ok(Box::new(PartitionedJoinMapSink::new(
                hash,
                ctx.projection.positions_in(ctx.schema)?,
                *num_partitions,
            ))),
            Some(ComputeInfo::Shuffle(ShuffleArg {
                num_partitions,
                mode: ShuffleMode::Repartition,
            })) => Ok(Box::new(RepartitionSink::new(hash, *num_partitions))),
            Some(other) => Err(Error::type_mismatch("Shuffle", other.kind())),
        }
    }

    fn executor(
        &self,
        join: &AtomicComputation,
        schema: &TupleSpec,
        pipelined_is_right: bool,
        info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn Stage>> {
        let (right_input, right_projection) = join_sides(join)?;
        let table = match info {
            Some(ComputeInfo::Join(arg)) => arg.table.clone(),
            Some(other) => return Err(Error::type_mismatch("Join", other.kind())),
            None => return Err(Error::HashSetNotFound(join.output_name().to_string())),
        };
        let (hashed, kept, build_width) = if pipelined_is_right {
            (right_input, right_projection, join.projection.atts().len())
        } else {
            (&join.input, &join.projection, right_projection.atts().len())
        };
        Ok(Box::new(JoinProbeStage::new(
            hashed.single_position_in(schema)?,
            kept.positions_in(schema)?,
            build_width,
            pipelined_is_right,
            table,
        )))
    }

    fn sink_merger(&self) -> Result<Arc<dyn SinkMerger>> {
        Ok(Arc::new(JoinSinkMerger))
    }
}
