//! Join probe stage.

use tcapflow_common::types::Value;
use tcapflow_common::utils::error::{Error, Result};

use super::{Stage, StageKind};
use crate::execution::{TupleSet, TupleSetBuilder};
use crate::hashset::JoinTable;

/// Probes a prebuilt hash table with the pipelined side of a join.
///
/// Every build row whose hash matches is emitted next to the pipelined
/// row's kept columns. The output column order always follows the JOIN
/// statement (left columns, then right columns), so when the pipelined side
/// is the right input the build columns come first.
pub struct JoinProbeStage {
    hash: usize,
    keep: Vec<usize>,
    build_width: usize,
    pipelined_is_right: bool,
    table: JoinTable,
}

impl JoinProbeStage {
    /// Creates a probe stage.
    ///
    /// `hash` is the position of the pipelined side's hash column, `keep`
    /// the positions of its kept columns, and `build_width` the number of
    /// columns in each stored build row.
    pub fn new(
        hash: usize,
        keep: Vec<usize>,
        build_width: usize,
        pipelined_is_right: bool,
        table: JoinTable,
    ) -> Self {
        Self {
            hash,
            keep,
            build_width,
            pipelined_is_right,
            table,
        }
    }
}

impl Stage for JoinProbeStage {
    fn process(&mut self, input: TupleSet) -> Result<TupleSet> {
        let hashes = input.column_checked(self.hash, "Join")?;
        for &p in &self.keep {
            input.column_checked(p, "Join")?;
        }

        let mut builder = TupleSetBuilder::new(self.build_width + self.keep.len());
        for (row, cell) in hashes.iter().enumerate() {
            let Value::UInt64(hash) = cell else {
                return Err(Error::type_mismatch("UInt64", cell.type_name()));
            };
            let matches = self.table.probe(*hash);
            if matches.is_empty() {
                continue;
            }
            let pipelined = input.gather(row, &self.keep);
            for build in matches {
                if build.len() != self.build_width {
                    return Err(Error::execution(format!(
                        "build row has {} columns, expected {}",
                        build.len(),
                        self.build_width
                    )));
                }
                let (first, second) = if self.pipelined_is_right {
                    (build.as_slice(), pipelined.as_slice())
                } else {
                    (pipelined.as_slice(), build.as_slice())
                };
                builder.push_row(first.iter().chain(second).cloned())?;
            }
        }
        Ok(builder.finish())
    }

    fn kind(&self) -> StageKind {
        StageKind::Join
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::JoinMap;
    use smallvec::smallvec;
    use std::sync::Arc;
    use tcapflow_common::utils::hash::hash_value;

    fn build_side() -> JoinTable {
        let mut map = JoinMap::new();
        for (key, payload) in [(1_i64, "b1"), (1, "b1'"), (2, "b2")] {
            map.insert(hash_value(&Value::Int64(key)), smallvec![Value::from(payload)]);
        }
        JoinTable::Shared(Arc::new(map))
    }

    fn probe_input() -> TupleSet {
        let keys = [1_i64, 2, 3];
        TupleSet::new(vec![
            keys.iter().map(|k| Value::from(format!("a{k}"))).collect(),
            keys.iter().map(|k| Value::UInt64(hash_value(&Value::Int64(*k)))).collect(),
        ])
        .unwrap()
    }

    #[test]
    fn test_probe_left_pipelined() {
        let mut stage = JoinProbeStage::new(1, vec![0], 1, false, build_side());
        let out = stage.process(probe_input()).unwrap();
        assert_eq!(out.num_rows(), 3);
        assert_eq!(out.column(0).unwrap()[0], Value::from("a1"));
        assert_eq!(out.column(1).unwrap()[2], Value::from("b2"));
    }

    #[test]
    fn test_probe_right_pipelined_swaps_columns() {
        let mut stage = JoinProbeStage::new(1, vec![0], 1, true, build_side());
        let out = stage.process(probe_input()).unwrap();
        assert_eq!(out.num_rows(), 3);
        assert_eq!(out.column(0).unwrap()[2], Value::from("b2"));
        assert_eq!(out.column(1).unwrap()[2], Value::from("a2"));
    }

    #[test]
    fn test_probe_requires_hash_column() {
        let input = TupleSet::from_column(vec![Value::from("not a hash")]);
        let mut stage = JoinProbeStage::new(0, vec![], 1, false, build_side());
        assert!(matches!(
            stage.process(input),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
