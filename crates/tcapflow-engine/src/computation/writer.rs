//! Writing objects to a stored set.

use std::sync::Arc;

use tcapflow_common::types::SetIdentifier;
use tcapflow_common::utils::error::Result;
use tcapflow_core::execution::{ComputeInfo, ComputeSink, ObjectSink};

use super::{
    Computation, InputTupleSetSpecifier, SinkContext, TcapFragment, computation_name,
    expect_inputs,
};

/// Stores every object of its input in `db`.`set`.
pub struct WriteUserSet {
    inputs: [Arc<dyn Computation>; 1],
    set: SetIdentifier,
}

impl WriteUserSet {
    /// Creates a writer of `input` into `db`.`set`.
    pub fn new(input: Arc<dyn Computation>, db: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            inputs: [input],
            set: SetIdentifier::new(db, set),
        }
    }
}

impl Computation for WriteUserSet {
    fn computation_type(&self) -> &'static str {
        "Output"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &self.inputs
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 1)?;
        let name = computation_name(self, label);
        let output = InputTupleSetSpecifier::new(format!("out_{label}"), Vec::new(), "");
        let text = format!(
            "{}() <= OUTPUT({}, '{}', '{}', '{name}')\n",
            output.tuple_set,
            inputs[0].object(),
            self.set.set,
            self.set.db
        );
        Ok(TcapFragment { text, output })
    }

    fn compute_sink(
        &self,
        ctx: &SinkContext<'_>,
        _info: Option<&ComputeInfo>,
    ) -> Result<Box<dyn ComputeSink>> {
        Ok(Box::new(ObjectSink::new(ctx.input.positions_in(ctx.schema)?)))
    }

    fn set_identifier(&self) -> Option<&SetIdentifier> {
        Some(&self.set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::ScanUserSet;

    #[test]
    fn test_output_tcap() {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "in"));
        let writer = WriteUserSet::new(scan, "db", "out");
        let input = InputTupleSetSpecifier::single("inputDataForScanUserSet_0", "in_0");
        let fragment = writer.to_tcap(&[input], 1).unwrap();
        assert_eq!(
            fragment.text,
            "out_1() <= OUTPUT(inputDataForScanUserSet_0(in_0), 'out', 'db', 'Output_1')\n"
        );
        assert_eq!(writer.set_identifier().unwrap().set, "out");
    }
}
