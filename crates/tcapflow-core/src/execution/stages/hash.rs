//! Hash stages: HashLeft, HashRight and HashOne.

use tcapflow_common::types::Value;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_common::utils::hash::hash_value;

use super::{Stage, StageKind};
use crate::execution::TupleSet;

/// Appends the stable hash of a key column as a `UInt64` column.
///
/// The three hash atomic computations differ only in which side of a join
/// (or which aggregation) they feed, so one stage type serves all of them.
pub struct HashStage {
    kind: StageKind,
    key: usize,
    include: Vec<usize>,
}

impl HashStage {
    /// Creates a hash stage of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` is not one of the hash kinds.
    pub fn new(kind: StageKind, key: usize, include: Vec<usize>) -> Result<Self> {
        if !matches!(
            kind,
            StageKind::HashLeft | StageKind::HashRight | StageKind::HashOne
        ) {
            return Err(Error::Internal(format!("{kind} is not a hash stage")));
        }
        Ok(Self { kind, key, include })
    }
}

impl Stage for HashStage {
    fn process(&mut self, input: TupleSet) -> Result<TupleSet> {
        let keys = input.column_checked(self.key, self.kind.name())?;
        let hashes: Vec<Value> = keys.iter().map(|k| Value::UInt64(hash_value(k))).collect();

        let mut columns = self
            .include
            .iter()
            .map(|&p| input.column_checked(p, self.kind.name()).map(<[Value]>::to_vec))
            .collect::<Result<Vec<_>>>()?;
        columns.push(hashes);
        TupleSet::new(columns)
    }

    fn kind(&self) -> StageKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_keys_hash_equal() {
        let input = TupleSet::new(vec![
            vec![Value::from("k"), Value::from("k"), Value::from("z")],
            vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)],
        ])
        .unwrap();

        let mut stage = HashStage::new(StageKind::HashLeft, 0, vec![1]).unwrap();
        let out = stage.process(input).unwrap();
        let hashes = out.column(1).unwrap();
        assert_eq!(hashes[0], hashes[1]);
        assert_ne!(hashes[0], hashes[2]);
        assert_eq!(out.column(0).unwrap()[2], Value::Int64(3));
        assert_eq!(stage.kind(), StageKind::HashLeft);
    }

    #[test]
    fn test_non_hash_kind_rejected() {
        assert!(HashStage::new(StageKind::Filter, 0, vec![]).is_err());
    }
}
