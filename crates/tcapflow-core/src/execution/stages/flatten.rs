//! Flatten stage.

use tcapflow_common::types::Value;
use tcapflow_common::utils::error::{Error, Result};

use super::{Stage, StageKind};
use crate::execution::{TupleSet, TupleSetBuilder};

/// Expands a list column: each element becomes its own row, next to a copy
/// of the kept columns. A null list produces no rows.
pub struct FlattenStage {
    list: usize,
    keep: Vec<usize>,
}

impl FlattenStage {
    /// Creates a flatten over column `list`, keeping `keep`.
    pub fn new(list: usize, keep: Vec<usize>) -> Self {
        Self { list, keep }
    }
}

impl Stage for FlattenStage {
    fn process(&mut self, input: TupleSet) -> Result<TupleSet> {
        let lists = input.column_checked(self.list, "Flatten")?;
        for &p in &self.keep {
            input.column_checked(p, "Flatten")?;
        }

        let mut builder = TupleSetBuilder::new(self.keep.len() + 1);
        for (row, cell) in lists.iter().enumerate() {
            let items = match cell {
                Value::List(items) => items.as_slice(),
                Value::Null => &[][..],
                other => return Err(Error::type_mismatch("List", other.type_name())),
            };
            for item in items {
                let mut out = input.gather(row, &self.keep);
                out.push(item.clone());
                builder.push_row(out)?;
            }
        }
        Ok(builder.finish())
    }

    fn kind(&self) -> StageKind {
        StageKind::Flatten
    }
}
