//! Reading a stored set.

use std::sync::Arc;

use tcapflow_adapters::tcap::AtomicComputation;
use tcapflow_common::types::SetIdentifier;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::{ComputeInfo, ComputeSource, ObjectSource};

use super::{Computation, InputTupleSetSpecifier, TcapFragment, computation_name, expect_inputs};

/// Scans every object of a stored set.
#[derive(Debug, Clone)]
pub struct ScanUserSet {
    set: SetIdentifier,
}

impl ScanUserSet {
    /// Creates a scan of `db`.`set`.
    pub fn new(db: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            set: SetIdentifier::new(db, set),
        }
    }
}

impl Computation for ScanUserSet {
    fn computation_type(&self) -> &'static str {
        "ScanUserSet"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &[]
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 0)?;
        let name = computation_name(self, label);
        let output = InputTupleSetSpecifier::single(format!("inputDataFor{name}"), format!("in_{label}"));
        let text = format!(
            "{}({}) <= SCAN('{}', '{}', '{name}')\n",
            output.tuple_set, output.added_column, self.set.set, self.set.db
        );
        Ok(TcapFragment { text, output })
    }

    fn compute_source(
        &self,
        producer: &AtomicComputation,
        info: Option<ComputeInfo>,
    ) -> Result<Box<dyn ComputeSource>> {
        match info {
            Some(ComputeInfo::Source(arg)) => Ok(Box::new(ObjectSource::new(arg.pages, arg.batch_size))),
            Some(other) => Err(Error::type_mismatch("Source", other.kind())),
            None => Err(Error::execution(format!(
                "scan of {} at '{}' was given no pages",
                self.set,
                producer.output_name()
            ))),
        }
    }

    fn set_identifier(&self) -> Option<&SetIdentifier> {
        Some(&self.set)
    }
}
