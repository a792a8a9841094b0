//! Filter plus a projection that returns many objects.

use std::sync::Arc;

use tcapflow_common::utils::error::Result;
use tcapflow_core::execution::Lambda;

use super::{
    Computation, InputTupleSetSpecifier, TcapFragment, computation_name, expect_inputs,
    selection_statements,
};

/// Like [`SelectionComp`](super::SelectionComp), but the projection returns
/// a list and every element becomes its own output object.
pub struct MultiSelectionComp {
    inputs: [Arc<dyn Computation>; 1],
    selection: Arc<dyn Lambda>,
    projection: Arc<dyn Lambda>,
}

impl MultiSelectionComp {
    /// Creates a multi-selection over `input`. `projection` must return a
    /// list.
    pub fn new(
        input: Arc<dyn Computation>,
        selection: impl Lambda + 'static,
        projection: impl Lambda + 'static,
    ) -> Self {
        Self {
            inputs: [input],
            selection: Arc::new(selection),
            projection: Arc::new(projection),
        }
    }
}

impl Computation for MultiSelectionComp {
    fn computation_type(&self) -> &'static str {
        "MultiSelectionComp"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &self.inputs
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 1)?;
        let name = computation_name(self, label);
        let mut text = String::new();
        let filtered = selection_statements(&mut text, &name, label, &inputs[0]);

        let lists = InputTupleSetSpecifier::single(format!("{name}_lists"), format!("list_{label}"));
        text.push_str(&format!(
            "{} <= APPLY({}, {}(), '{name}', 'projection_{label}')\n",
            lists.spec(),
            filtered.object(),
            filtered.tuple_set,
        ));

        let output = InputTupleSetSpecifier::single(format!("{name}_out"), format!("out_{label}"));
        text.push_str(&format!(
            "{} <= FLATTEN({}, {}(), '{name}')\n",
            output.spec(),
            lists.object(),
            lists.tuple_set,
        ));
        Ok(TcapFragment { text, output })
    }

    fn lambdas(&self, label: usize) -> Vec<(String, Arc<dyn Lambda>)> {
        vec![
            (format!("selection_{label}"), Arc::clone(&self.selection)),
            (format!("projection_{label}"), Arc::clone(&self.projection)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::ScanUserSet;
    use tcapflow_adapters::tcap::{AtomicOp, parse_tcap};
    use tcapflow_common::types::Value;
    use tcapflow_core::execution::FnLambda;

    #[test]
    fn test_multi_selection_ends_in_flatten() {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "s"));
        let comp = MultiSelectionComp::new(
            Arc::clone(&scan),
            FnLambda::unary(|_| Ok(Value::Bool(true))),
            FnLambda::unary(|v: &Value| Ok(Value::List(vec![v.clone(), v.clone()]))),
        );
        let scan_fragment = scan.to_tcap(&[], 0).unwrap();
        let fragment = comp.to_tcap(&[scan_fragment.output.clone()], 1).unwrap();
        let program = parse_tcap(&(scan_fragment.text + &fragment.text)).unwrap();

        let last = program.producer("MultiSelectionComp_1_out").unwrap();
        assert!(matches!(last.op, AtomicOp::Flatten));
        assert_eq!(last.input.atts(), ["list_1"]);
    }
}
