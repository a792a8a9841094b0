//! Apply stage: evaluate a lambda and append its result.

use std::sync::Arc;

use tcapflow_common::types::Value;
use tcapflow_common::utils::error::Result;

use super::{Stage, StageKind};
use crate::execution::TupleSet;

/// A native function over the values of the applied columns.
pub type ApplyFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Evaluates a function per row.
///
/// Output columns are the included columns, in order, followed by the
/// function's result.
pub struct ApplyStage {
    apply: Vec<usize>,
    include: Vec<usize>,
    func: ApplyFn,
}

impl ApplyStage {
    /// Creates an apply stage reading `apply` and copying `include`.
    pub fn new(apply: Vec<usize>, include: Vec<usize>, func: ApplyFn) -> Self {
        Self {
            apply,
            include,
            func,
        }
    }
}

impl Stage for ApplyStage {
    fn process(&mut self, input: TupleSet) -> Result<TupleSet> {
        let args: Vec<&[Value]> = self
            .apply
            .iter()
            .map(|&p| input.column_checked(p, "Apply"))
            .collect::<Result<_>>()?;

        let mut scratch = Vec::with_capacity(args.len());
        let mut computed = Vec::with_capacity(input.num_rows());
        for row in 0..input.num_rows() {
            scratch.clear();
            scratch.extend(args.iter().map(|col| col[row].clone()));
            computed.push((self.func)(&scratch)?);
        }

        let mut columns = self
            .include
            .iter()
            .map(|&p| input.column_checked(p, "Apply").map(<[Value]>::to_vec))
            .collect::<Result<Vec<_>>>()?;
        columns.push(computed);
        TupleSet::new(columns)
    }

    fn kind(&self) -> StageKind {
        StageKind::Apply
    }
}
