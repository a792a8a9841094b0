//! Filter plus projection.

use std::sync::Arc;

use tcapflow_common::utils::error::Result;
use tcapflow_core::execution::Lambda;

use super::{
    Computation, InputTupleSetSpecifier, TcapFragment, computation_name, expect_inputs,
    selection_statements,
};

/// Keeps the objects a selection lambda accepts and maps each through a
/// projection lambda.
pub struct SelectionComp {
    inputs: [Arc<dyn Computation>; 1],
    selection: Arc<dyn Lambda>,
    projection: Arc<dyn Lambda>,
}

impl SelectionComp {
    /// Creates a selection over `input`. `selection` must return a bool.
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

impl Computation for SelectionComp {
    fn computation_type(&self) -> &'static str {
        "SelectionComp"
    }

    fn inputs(&self) -> &[Arc<dyn Computation>] {
        &self.inputs
    }

    fn to_tcap(&self, inputs: &[InputTupleSetSpecifier], label: usize) -> Result<TcapFragment> {
        expect_inputs(self, inputs, 1)?;
        let name = computation_name(self, label);
        let mut text = String::new();
        let filtered = selection_statements(&mut text, &name, label, &inputs[0]);

        let output = InputTupleSetSpecifier::single(format!("{name}_out"), format!("out_{label}"));
        text.push_str(&format!(
            "{}({}) <= APPLY({}, {}(), '{name}', 'projection_{label}')\n",
            output.tuple_set,
            output.added_column,
            filtered.object(),
            filtered.tuple_set,
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
    use tcapflow_adapters::tcap::parse_tcap;
    use tcapflow_common::types::Value;
    use tcapflow_core::execution::FnLambda;

    fn selection() -> SelectionComp {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "s"));
        SelectionComp::new(
            scan,
            FnLambda::unary(|v: &Value| Ok(Value::Bool(v.as_int64().unwrap_or(0) > 0))),
            FnLambda::unary(|v: &Value| Ok(v.clone())),
        )
    }

    #[test]
    fn test_selection_tcap_parses() {
        let scan = ScanUserSet::new("db", "s").to_tcap(&[], 0).unwrap();
        let sel = selection().to_tcap(&[scan.output.clone()], 1).unwrap();
        let program = parse_tcap(&(scan.text + &sel.text)).unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(sel.output.tuple_set, "SelectionComp_1_out");
        assert_eq!(
            program.producer("SelectionComp_1_out").unwrap().projection.atts().len(),
            0
        );
    }

    #[test]
    fn test_selection_lambda_names() {
        let names: Vec<String> = selection().lambdas(7).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["selection_7", "projection_7"]);
    }
}
