//! Group-by aggregation.

use std::sync::Arc;

use tcapflow_adapters::tcap::{AtomicComputation, AtomicOp};
use tcapflow_common::types::Value;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::{
    AggregateSource, AggregationSink, AggregationSinkMerger, CombineFn, ComputeInfo, ComputeSink,
    ComputeSource, FinalizeFn, Lambda, ShuffleArg, SinkMerger,
};

use super::{
    Computation, InputTupleSetSpecifier, SinkContext, TcapFragment, computation_name,
    expect_inputs, tcap_spec, with_column,
};

/// Groups objects by `key`, folds each group's `value`s with `combine`, and
/// turns every finished group into one object with `finalize`.
pub struct AggregationComp {
    inputs: [Arc<dyn Computation>; 1],
    key: Arc<dyn Lambda>,
    value: Arc<dyn Lambda>,
    combine: CombineFn,
    finalize: FinalizeFn,
}

impl AggregationComp {
    /// Creates an aggregation over `input`.
    pub fn new<C, F>(
        input: Arc<dyn Computation>,
        key: impl Lambda + 'static,
        value: impl Lambda + 'static,
        combine: C,
        finalize: F,
    ) -> Self
    where
        C: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
        F: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            inputs: [input],
            key: Arc::new(key),
            value: Arc::new(value),
            combine: Arc::new(combine),
            finalize: Arc::new(finalize),
        }
    }

    /// The value combiner.
    #[must_use]
    pub fn combiner(&self) -> &CombineFn {
        &self.combine
    }
}

impl Computation for AggregationComp {
    fn computation_type(&self) -> &'static str {
        "AggregationComp"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &self.inputs
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 1)?;
        let input = &inputs[0];
        let name = computation_name(self, label);
        let (key, value, hash) = (
            format!("key_{label}"),
            format!("value_{label}"),
            format!("hash_{label}"),
        );

        let with_key = format!("{name}_withKey");
        let with_value = format!("{name}_withValue");
        let hashed = format!("{name}_hashed");
        let key_value = [key.clone(), value.clone()];
        let grouped = [key.clone(), value.clone(), hash.clone()];
        let output = InputTupleSetSpecifier::single(format!("{name}_out"), format!("agg_{label}"));

        let text = [
            format!(
                "{} <= APPLY({}, {}, '{name}', 'key_{label}')",
                tcap_spec(&with_key, &with_column(&input.columns, &key)),
                input.object(),
                input.spec(),
            ),
            format!(
                "{} <= APPLY({}, {}, '{name}', 'value_{label}')",
                tcap_spec(&with_value, &key_value),
                tcap_spec(&with_key, std::slice::from_ref(&input.added_column)),
                tcap_spec(&with_key, std::slice::from_ref(&key)),
            ),
            format!(
                "{} <= HASHONE({}, {}, '{name}')",
                tcap_spec(&hashed, &grouped),
                tcap_spec(&with_value, std::slice::from_ref(&key)),
                tcap_spec(&with_value, &key_value),
            ),
            format!(
                "{} <= AGGREGATE({}, '{name}')",
                output.spec(),
                tcap_spec(&hashed, &grouped),
            ),
        ]
        .join("\n")
            + "\n";
        Ok(TcapFragment { text, output })
    }

    fn lambdas(&self, label: usize) -> Vec<(String, Arc<dyn Lambda>)> {
        vec![
            (format!("key_{label}"), Arc::clone(&self.key)),
            (format!("value_{label}"), Arc::clone(&self.value)),
        ]
    }

    fn compute_source(
        &self,
        producer: &AtomicComputation,
        info: Option<ComputeInfo>,
    ) -> Result<Box<dyn ComputeSource>> {
        if !matches!(producer.op, AtomicOp::Aggregate) {
            return Err(Error::NoSourceFound(producer.output_name().to_string()));
        }
        match info {
            Some(ComputeInfo::Aggregates(arg)) => Ok(Box::new(AggregateSource::new(
                arg.maps,
                arg.partition,
                Arc::clone(&self.finalize),
                arg.batch_size,
            ))),
            Some(other) => Err(Error::type_mismatch("Aggregates", other.kind())),
            None => Err(Error::HashSetNotFound(producer.output_name().to_string())),
        }
    }

    fn compute_sink(
        &self,
        ctx: &SinkContext<'_>,
        info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn ComputeSink>> {
        if !matches!(ctx.consumer.op, AtomicOp::Aggregate) {
            return Err(Error::type_mismatch("Aggregate", ctx.consumer.op.name()));
        }
        let positions = ctx.input.positions_in(ctx.schema)?;
        let &[key, value, hash] = positions.as_slice() else {
            return Err(Error::execution(format!(
                "aggregation reads (key, value, hash), found {}",
                ctx.input
            )));
        };
        let num_partitions = match info {
            Some(ComputeInfo::Shuffle(ShuffleArg { num_partitions, .. })) => *num_partitions,
            Some(other) => return Err(Error::type_mismatch("Shuffle", other.kind())),
            None => 1,
        };
        Ok(Box::new(AggregationSink::new(
            key,
            value,
            hash,
            num_partitions,
            Arc::clone(&self.combine),
        )))
    }

    fn sink_merger(&self) -> Result<Arc<dyn SinkMerger>> {
        Ok(Arc::new(AggregationSinkMerger::new(Arc::clone(&self.combine))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::ScanUserSet;
    use tcapflow_adapters::tcap::parse_tcap;
    use tcapflow_core::execution::FnLambda;

    fn count_by_parity() -> AggregationComp {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "numbers"));
        AggregationComp::new(
            scan,
            FnLambda::unary(|v: &Value| Ok(Value::Int64(v.as_int64().unwrap_or(0) % 2))),
            FnLambda::unary(|_| Ok(Value::Int64(1))),
            |a: &Value, b: &Value| Ok(Value::Int64(a.as_int64().unwrap_or(0) + b.as_int64().unwrap_or(0))),
            |k: &Value, v: &Value| Ok(Value::List(vec![k.clone(), v.clone()])),
        )
    }

    #[test]
    fn test_aggregation_tcap() {
        let scan = ScanUserSet::new("db", "numbers").to_tcap(&[], 0).unwrap();
        let fragment = count_by_parity().to_tcap(&[scan.output.clone()], 1).unwrap();
        let program = parse_tcap(&(scan.text + &fragment.text)).unwrap();
        assert_eq!(program.len(), 5);

        let agg = program.producer("AggregationComp_1_out").unwrap();
        assert!(matches!(agg.op, AtomicOp::Aggregate));
        assert_eq!(agg.input.atts(), ["key_1", "value_1", "hash_1"]);
        assert!(matches!(
            program.producer("AggregationComp_1_hashed").unwrap().op,
            AtomicOp::HashOne
        ));
    }

    #[test]
    fn test_combiner_is_exposed() {
        let comp = count_by_parity();
        let sum = (comp.combiner())(&Value::Int64(2), &Value::Int64(3)).unwrap();
        assert_eq!(sum, Value::Int64(5));
    }
}
