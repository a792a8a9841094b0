//! Filter stage.

use tcapflow_common::types::Value;
use tcapflow_common::utils::error::{Error, Result};

use super::{Stage, StageKind};
use crate::execution::TupleSet;

/// Keeps the rows whose boolean column is true and projects the kept
/// columns.
pub struct FilterStage {
    predicate: usize,
    keep: Vec<usize>,
}

impl FilterStage {
    /// Creates a filter on column `predicate`, keeping `keep`.
    pub fn new(predicate: usize, keep: Vec<usize>) -> Self {
        Self { predicate, keep }
    }
}

impl Stage for FilterStage {
    fn process(&mut self, input: TupleSet) -> Result<TupleSet> {
        let flags = input.column_checked(self.predicate, "Filter")?;
        let mut selected = Vec::with_capacity(flags.len());
        for (row, flag) in flags.iter().enumerate() {
            match flag {
                Value::Bool(true) => selected.push(row),
                Value::Bool(false) | Value::Null => {}
                other => return Err(Error::type_mismatch("Bool", other.type_name())),
            }
        }

        let projected = self
            .keep
            .iter()
            .map(|&p| {
                let column = input.column_checked(p, "Filter")?;
                Ok(selected.iter().map(|&row| column[row].clone()).collect())
            })
            .collect::<Result<Vec<Vec<Value>>>>()?;
        TupleSet::new(projected)
    }

    fn kind(&self) -> StageKind {
        StageKind::Filter
    }
}
