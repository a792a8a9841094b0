//! The logical plan: a parsed TCAP program bound to its computations.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use tcapflow_adapters::tcap::{AtomicComputationList, parse_tcap};
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::execution::Lambda;

use crate::computation::{Computation, computation_name};

/// One user computation and the lambdas its statements refer to.
pub struct ComputationNode {
    /// The computation.
    pub computation: Arc<dyn Computation>,
    /// Lambdas by name.
    pub lambdas: HashMap<String, Arc<dyn Lambda>>,
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lambdas: Vec<&str> = self.lambdas.keys().map(String::as_str).collect();
        lambdas.sort_unstable();
        f.debug_struct("ComputationNode")
            .field("computation", &self.computation)
            .field("lambdas", &lambdas)
            .finish()
    }
}

/// Parsed statements plus an index from computation name to the user
/// computation that produced them.
///
/// Every statement's computation name resolves to a node, and every lambda
/// a statement names exists on that node.
#[derive(Debug)]
pub struct LogicalPlan {
    computations: AtomicComputationList,
    nodes: IndexMap<String, ComputationNode>,
}

impl LogicalPlan {
    /// Parses `tcap` and binds it to `computations`, where computation `i`
    /// is named `{type}_i`.
    ///
    /// # Errors
    ///
    /// Fails if the program does not parse or resolve, names a computation
    /// that is not in `computations`, or names a lambda its computation
    /// does not have.
    pub fn build(tcap: &str, computations: &[Arc<dyn Computation>]) -> Result<Self> {
        let list = parse_tcap(tcap)?;
        let nodes = computations
            .iter()
            .enumerate()
            .map(|(label, computation)| {
                let node = ComputationNode {
                    computation: Arc::clone(computation),
                    lambdas: computation.lambdas(label).into_iter().collect(),
                };
                (computation_name(computation.as_ref(), label), node)
            })
            .collect();
        let plan = Self {
            computations: list,
            nodes,
        };
        plan.validate()?;
        tracing::debug!(
            "logical plan: {} statements over {} computations",
            plan.computations.len(),
            plan.nodes.len()
        );
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        for statement in self.computations.iter() {
            let node = self.node(&statement.computation_name)?;
            if let Some(lambda) = statement.op.lambda()
                && !node.lambdas.contains_key(lambda)
            {
                return Err(Error::UnknownLambda {
                    computation: statement.computation_name.clone(),
                    lambda: lambda.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The parsed statements.
    #[must_use]
    pub fn computations(&self) -> &AtomicComputationList {
        &self.computations
    }

    /// The node named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComputation`].
    pub fn node(&self, name: &str) -> Result<&ComputationNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::UnknownComputation(name.to_string()))
    }

    /// The user computation named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComputation`].
    pub fn computation(&self, name: &str) -> Result<&Arc<dyn Computation>> {
        Ok(&self.node(name)?.computation)
    }

    /// Lambda `lambda` of computation `computation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComputation`] or [`Error::UnknownLambda`].
    pub fn lambda(&self, computation: &str, lambda: &str) -> Result<&Arc<dyn Lambda>> {
        self.node(computation)?
            .lambdas
            .get(lambda)
            .ok_or_else(|| Error::UnknownLambda {
                computation: computation.to_string(),
                lambda: lambda.to_string(),
            })
    }

    /// Computation names, in label order.
    pub fn computation_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}
