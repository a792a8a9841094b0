//! Linearizes a computation graph into TCAP text.
//!
//! The walk starts from every graph sink and visits inputs depth-first in
//! input-index order. A node's own statements are emitted after all of its
//! inputs (post-order), so every statement only reads tuple sets that were
//! defined above it. Each distinct node gets the next label exactly once,
//! even when several consumers reach it.

use std::sync::Arc;

use hashbrown::HashMap;
use tcapflow_common::utils::error::Result;

use crate::computation::{Computation, InputTupleSetSpecifier, computation_name};

/// The result of analyzing a computation graph.
#[derive(Debug, Clone)]
pub struct AnalyzedGraph {
    /// The TCAP program.
    pub tcap: String,
    /// Every visited computation; the computation at index `i` has label
    /// `i`.
    pub computations: Vec<Arc<dyn Computation>>,
}

/// Turns a graph of [`Computation`]s into a TCAP program.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tcapflow_engine::QueryGraphAnalyzer;
/// use tcapflow_engine::computation::{Computation, ScanUserSet, WriteUserSet};
///
/// let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "in"));
/// let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(scan, "db", "out"));
///
/// let tcap = QueryGraphAnalyzer::new(vec![out]).parse_tcap_string().unwrap();
/// assert_eq!(tcap.lines().count(), 2);
/// ```
pub struct QueryGraphAnalyzer {
    sinks: Vec<Arc<dyn Computation>>,
}

#[derive(Default)]
struct Walk {
    computation_label: usize,
    visited: HashMap<*const (), InputTupleSetSpecifier>,
    text: String,
    computations: Vec<Arc<dyn Computation>>,
}

impl QueryGraphAnalyzer {
    /// Creates an analyzer for the graph ending in `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn Computation>>) -> Self {
        Self { sinks }
    }

    /// Returns the TCAP program for the graph.
    ///
    /// # Errors
    ///
    /// Fails if a computation cannot describe itself for the inputs it was
    /// given.
    pub fn parse_tcap_string(&self) -> Result<String> {
        Ok(self.analyze()?.tcap)
    }

    /// Returns the TCAP program together with the labelled computations.
    ///
    /// # Errors
    ///
    /// Fails if a computation cannot describe itself for the inputs it was
    /// given.
    pub fn analyze(&self) -> Result<AnalyzedGraph> {
        let mut walk = Walk::default();
        for sink in &self.sinks {
            Self::visit(sink, &mut walk)?;
        }
        tracing::debug!(
            "analyzed {} computations into {} TCAP statements",
            walk.computations.len(),
            walk.text.lines().count()
        );
        Ok(AnalyzedGraph {
            tcap: walk.text,
            computations: walk.computations,
        })
    }

    fn visit(node: &Arc<dyn Computation>, walk: &mut Walk) -> Result<InputTupleSetSpecifier> {
        let key = Arc::as_ptr(node).cast::<()>();
        if let Some(done) = walk.visited.get(&key) {
            return Ok(done.clone());
        }

        let inputs = node
            .inputs()
            .iter()
            .map(|input| Self::visit(input, walk))
            .collect::<Result<Vec<_>>>()?;

        let label = walk.computation_label;
        walk.computation_label += 1;
        let fragment = node.to_tcap(&inputs, label)?;
        tracing::debug!("emitted {}", computation_name(node.as_ref(), label));

        walk.text.push_str(&fragment.text);
        walk.computations.push(Arc::clone(node));
        walk.visited.insert(key, fragment.output.clone());
        Ok(fragment.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{JoinComp, ScanUserSet, SelectionComp, WriteUserSet};
    use tcapflow_adapters::tcap::parse_tcap;
    use tcapflow_common::types::Value;
    use tcapflow_core::execution::FnLambda;

    fn identity() -> FnLambda {
        FnLambda::unary(|v: &Value| Ok(v.clone()))
    }

    #[test]
    fn test_labels_follow_post_order() {
        let a: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "a"));
        let b: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "b"));
        let join: Arc<dyn Computation> = Arc::new(JoinComp::new(
            a,
            b,
            identity(),
            identity(),
            FnLambda::binary(|l: &Value, _| Ok(l.clone())),
        ));
        let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(join, "db", "out"));

        let graph = QueryGraphAnalyzer::new(vec![out]).analyze().unwrap();
        let program = parse_tcap(&graph.tcap).unwrap();
        assert_eq!(
            program.computation_names(),
            vec!["ScanUserSet_0", "ScanUserSet_1", "JoinComp_2", "Output_3"]
        );
        assert_eq!(graph.computations.len(), 4);
        assert_eq!(graph.computations[2].computation_type(), "JoinComp");
    }

    #[test]
    fn test_shared_input_is_visited_once() {
        let scan: Arc<dyn Computation> = Arc::new(ScanUserSet::new("db", "a"));
        let keep_all = || FnLambda::unary(|_| Ok(Value::Bool(true)));
        let left: Arc<dyn Computation> =
            Arc::new(SelectionComp::new(Arc::clone(&scan), keep_all(), identity()));
        let right: Arc<dyn Computation> =
            Arc::new(SelectionComp::new(Arc::clone(&scan), keep_all(), identity()));
        let out_left: Arc<dyn Computation> = Arc::new(WriteUserSet::new(left, "db", "l"));
        let out_right: Arc<dyn Computation> = Arc::new(WriteUserSet::new(right, "db", "r"));

        let graph = QueryGraphAnalyzer::new(vec![out_left, out_right])
            .analyze()
            .unwrap();
        let program = parse_tcap(&graph.tcap).unwrap();
        assert_eq!(program.scans().count(), 1);
        assert_eq!(graph.computations.len(), 5);
        assert_eq!(
            program.computation_names(),
            vec![
                "ScanUserSet_0",
                "SelectionComp_1",
                "Output_2",
                "SelectionComp_3",
                "Output_4"
            ]
        );
        assert_eq!(program.consumers("inputDataForScanUserSet_0").len(), 2);
    }
}
