//! Output containers written by sinks and merged by build stages.
//!
//! A container is what one output page holds. Scans and writers use
//! [`Container::Objects`]; join builds produce [`JoinMap`]s (one, or one per
//! partition); aggregations produce [`AggMap`]s; the probe side of a
//! hash-partitioned join is repartitioned into per-partition row lists.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tcapflow_common::types::{Row, Value, row_footprint};
use tcapflow_common::utils::error::{Error, Result};

/// Combines two partial aggregate values into one.
pub type CombineFn = Arc<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;

/// Per-key bookkeeping charged on top of the row footprint.
pub const ENTRY_OVERHEAD: usize = 16;

/// Hash table from join-key hash to the build-side rows carrying that hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinMap {
    entries: HashMap<u64, Vec<Row>>,
    num_rows: usize,
    footprint: usize,
}

impl JoinMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes needed to insert `row`, given whether its hash is new.
    #[must_use]
    pub fn insert_cost(&self, hash: u64, row: &[Value]) -> usize {
        let key_cost = if self.entries.contains_key(&hash) {
            0
        } else {
            ENTRY_OVERHEAD
        };
        key_cost + row_footprint(row)
    }

    /// Inserts a build-side row under `hash`.
    pub fn insert(&mut self, hash: u64, row: Row) {
        self.footprint += self.insert_cost(hash, &row);
        self.entries.entry(hash).or_default().push(row);
        self.num_rows += 1;
    }

    /// Rows stored under `hash`.
    #[must_use]
    pub fn probe(&self, hash: u64) -> &[Row] {
        self.entries.get(&hash).map_or(&[], Vec::as_slice)
    }

    /// Moves every row of `other` into this map.
    pub fn merge(&mut self, other: JoinMap) {
        for (hash, rows) in other.entries {
            if !self.entries.contains_key(&hash) {
                self.footprint += ENTRY_OVERHEAD;
            }
            let bucket = self.entries.entry(hash).or_default();
            for row in rows {
                self.footprint += row_footprint(&row);
                self.num_rows += 1;
                bucket.push(row);
            }
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_rows
    }

    /// Returns true if the map holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Number of distinct hashes.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.entries.len()
    }

    /// Approximate bytes held.
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    /// Iterates `(hash, rows)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[Row])> {
        self.entries.iter().map(|(h, rows)| (*h, rows.as_slice()))
    }
}

/// Aggregation accumulator from group key to partial value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggMap {
    entries: HashMap<Value, Value>,
    footprint: usize,
}

impl AggMap {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes needed to add `key`, or zero if it is already present.
    #[must_use]
    pub fn insert_cost(&self, key: &Value, value: &Value) -> usize {
        if self.entries.contains_key(key) {
            0
        } else {
            ENTRY_OVERHEAD + key.footprint() + value.footprint()
        }
    }

    /// Folds `value` into the entry for `key`.
    ///
    /// # Errors
    ///
    /// Propagates failures of the combiner.
    pub fn combine(&mut self, key: Value, value: Value, combine: &CombineFn) -> Result<()> {
        match self.entries.get_mut(&key) {
            Some(current) => {
                *current = combine(current, &value)?;
            }
            None => {
                self.footprint += ENTRY_OVERHEAD + key.footprint() + value.footprint();
                self.entries.insert(key, value);
            }
        }
        Ok(())
    }

    /// Folds every entry of `other` into this accumulator.
    ///
    /// # Errors
    ///
    /// Propagates failures of the combiner.
    pub fn merge(&mut self, other: AggMap, combine: &CombineFn) -> Result<()> {
        for (key, value) in other.entries {
            self.combine(key, value, combine)?;
        }
        Ok(())
    }

    /// Looks up the value for `key`.
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate bytes held.
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    /// Iterates `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

/// The content of one output page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Container {
    /// User objects, one per record.
    Objects(Vec<Value>),
    /// A single (broadcast) join hash table.
    JoinMap(JoinMap),
    /// One join hash table per partition.
    PartitionedJoinMaps(Vec<JoinMap>),
    /// One aggregation accumulator.
    Aggregates(AggMap),
    /// One aggregation accumulator per partition.
    PartitionedAggregates(Vec<AggMap>),
    /// Full rows routed to their partition.
    PartitionedRows(Vec<Vec<Row>>),
}

impl Container {
    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Container::Objects(_) => "Objects",
            Container::JoinMap(_) => "JoinMap",
            Container::PartitionedJoinMaps(_) => "PartitionedJoinMaps",
            Container::Aggregates(_) => "Aggregates",
            Container::PartitionedAggregates(_) => "PartitionedAggregates",
            Container::PartitionedRows(_) => "PartitionedRows",
        }
    }

    /// Number of records held, summed over partitions.
    #[must_use]
    pub fn record_count(&self) -> usize {
        match self {
            Container::Objects(items) => items.len(),
            Container::JoinMap(map) => map.len(),
            Container::PartitionedJoinMaps(maps) => maps.iter().map(JoinMap::len).sum(),
            Container::Aggregates(map) => map.len(),
            Container::PartitionedAggregates(maps) => maps.iter().map(AggMap::len).sum(),
            Container::PartitionedRows(parts) => parts.iter().map(Vec::len).sum(),
        }
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Approximate bytes held.
    #[must_use]
    pub fn footprint(&self) -> usize {
        match self {
            Container::Objects(items) => items.iter().map(Value::footprint).sum(),
            Container::JoinMap(map) => map.footprint(),
            Container::PartitionedJoinMaps(maps) => maps.iter().map(JoinMap::footprint).sum(),
            Container::Aggregates(map) => map.footprint(),
            Container::PartitionedAggregates(maps) => maps.iter().map(AggMap::footprint).sum(),
            Container::PartitionedRows(parts) => parts
                .iter()
                .flat_map(|rows| rows.iter().map(|r| row_footprint(r)))
                .sum(),
        }
    }

    /// Unwraps [`Container::Objects`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other variant.
    pub fn into_objects(self) -> Result<Vec<Value>> {
        match self {
            Container::Objects(items) => Ok(items),
            other => Err(Error::type_mismatch("Objects", other.kind())),
        }
    }

    /// Unwraps [`Container::JoinMap`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other variant.
    pub fn into_join_map(self) -> Result<JoinMap> {
        match self {
            Container::JoinMap(map) => Ok(map),
            other => Err(Error::type_mismatch("JoinMap", other.kind())),
        }
    }

    /// Unwraps [`Container::Aggregates`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other variant.
    pub fn into_aggregates(self) -> Result<AggMap> {
        match self {
            Container::Aggregates(map) => Ok(map),
            other => Err(Error::type_mismatch("Aggregates", other.kind())),
        }
    }

    /// Takes partition `partition` out of a partitioned container, leaving
    /// an empty partition behind.
    ///
    /// # Errors
    ///
    /// Fails if the container is not partitioned or `partition` is out of
    /// range.
    pub fn take_partition(&mut self, partition: usize) -> Result<Container> {
        let out_of_range = |n: usize| {
            Error::execution(format!(
                "partition {partition} out of range for a container with {n} partitions"
            ))
        };
        match self {
            Container::PartitionedJoinMaps(maps) => {
                let n = maps.len();
                let map = maps.get_mut(partition).ok_or_else(|| out_of_range(n))?;
                Ok(Container::JoinMap(std::mem::take(map)))
            }
            Container::PartitionedAggregates(maps) => {
                let n = maps.len();
                let map = maps.get_mut(partition).ok_or_else(|| out_of_range(n))?;
                Ok(Container::Aggregates(std::mem::take(map)))
            }
            other => Err(Error::type_mismatch("partitioned container", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn sum() -> CombineFn {
        Arc::new(|a: &Value, b: &Value| match (a, b) {
            (Value::Int64(x), Value::Int64(y)) => Ok(Value::Int64(x + y)),
            _ => Err(Error::type_mismatch("Int64", a.type_name())),
        })
    }

    #[test]
    fn test_join_map_insert_and_probe() {
        let mut map = JoinMap::new();
        map.insert(7, smallvec![Value::Int64(1)]);
        map.insert(7, smallvec![Value::Int64(2)]);
        map.insert(9, smallvec![Value::Int64(3)]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.num_keys(), 2);
        assert_eq!(map.probe(7).len(), 2);
        assert!(map.probe(8).is_empty());
    }

    #[test]
    fn test_join_map_merge_keeps_footprint_consistent() {
        let mut a = JoinMap::new();
        a.insert(1, smallvec![Value::from("x")]);
        let mut b = JoinMap::new();
        b.insert(1, smallvec![Value::from("y")]);
        b.insert(2, smallvec![Value::from("z")]);

        let mut direct = JoinMap::new();
        direct.insert(1, smallvec![Value::from("x")]);
        direct.insert(1, smallvec![Value::from("y")]);
        direct.insert(2, smallvec![Value::from("z")]);

        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.footprint(), direct.footprint());
    }

    #[test]
    fn test_agg_map_combine() {
        let combine = sum();
        let mut map = AggMap::new();
        map.combine(Value::from("a"), Value::Int64(1), &combine).unwrap();
        map.combine(Value::from("a"), Value::Int64(4), &combine).unwrap();
        map.combine(Value::from("b"), Value::Int64(2), &combine).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Value::from("a")), Some(&Value::Int64(5)));
    }

    #[test]
    fn test_take_partition() {
        let mut maps = vec![JoinMap::new(), JoinMap::new()];
        maps[1].insert(3, smallvec![Value::Int64(3)]);
        let mut container = Container::PartitionedJoinMaps(maps);
        let taken = container.take_partition(1).unwrap().into_join_map().unwrap();
        assert_eq!(taken.len(), 1);
        assert!(container.is_empty());
        assert!(container.take_partition(5).is_err());
    }
}
