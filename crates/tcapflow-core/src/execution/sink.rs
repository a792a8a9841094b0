//! Compute sinks: where a pipeline's final batches are written.
//!
//! A sink appends rows to the output container of the current page and
//! charges their size against the page's [`AllocationBlock`]. When the block
//! runs out it reports [`WriteProgress::Full`] with the first row it could
//! not write; the pipeline then flushes the page, starts a fresh one, and
//! calls the sink again from that row.

use tcapflow_common::memory::AllocationBlock;
use tcapflow_common::types::{Row, Value, row_footprint};
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_common::utils::hash::partition_of;

use super::{AggMap, CombineFn, Container, JoinMap, TupleSet};

/// Outcome of one [`ComputeSink::write_out`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Every row was written.
    Complete,
    /// The page filled up; rows from `next_row` on were not written.
    Full {
        /// First unwritten row.
        next_row: usize,
    },
}

/// Consumes the final batches of a pipeline.
pub trait ComputeSink: Send {
    /// Creates an empty container for a fresh output page.
    fn create_new_output_container(&self) -> Container;

    /// Writes rows `from_row..` of `input` into `output`.
    ///
    /// # Errors
    ///
    /// Fails on malformed input or a container of the wrong kind. Running out
    /// of page space is not an error; it is reported as
    /// [`WriteProgress::Full`].
    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress>;

    /// Returns the name of this sink for debugging.
    fn name(&self) -> &'static str;
}

/// Charges `bytes` to `block`, mapping exhaustion to `Ok(false)`.
fn charge(block: &mut AllocationBlock, bytes: usize) -> Result<bool> {
    match block.try_allocate(bytes) {
        Ok(()) => Ok(true),
        Err(e) if e.is_recoverable() => Ok(false),
        Err(e) => Err(e),
    }
}

fn hash_at(column: &[Value], row: usize) -> Result<u64> {
    match &column[row] {
        Value::UInt64(hash) => Ok(*hash),
        other => Err(Error::type_mismatch("UInt64", other.type_name())),
    }
}

fn wrong_container(sink: &str, found: &Container) -> Error {
    Error::Internal(format!("{sink} cannot write into a {} container", found.kind()))
}

/// Writes user objects into [`Container::Objects`].
///
/// A single column is stored as is; wider rows are stored as lists.
pub struct ObjectSink {
    columns: Vec<usize>,
}

impl ObjectSink {
    /// Creates a sink storing `columns` of each row.
    pub fn new(columns: Vec<usize>) -> Self {
        Self { columns }
    }
}

impl ComputeSink for ObjectSink {
    fn create_new_output_container(&self) -> Container {
        Container::Objects(Vec::new())
    }

    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress> {
        for &c in &self.columns {
            input.column_checked(c, self.name())?;
        }
        let objects = match output {
            Container::Objects(objects) => objects,
            other => return Err(wrong_container(self.name(), other)),
        };
        for row in from_row..input.num_rows() {
            let object = match self.columns.as_slice() {
                [single] => input.column_checked(*single, "ObjectSink")?[row].clone(),
                columns => Value::List(input.gather(row, columns).into_vec()),
            };
            if !charge(block, object.footprint())? {
                return Ok(WriteProgress::Full { next_row: row });
            }
            objects.push(object);
        }
        Ok(WriteProgress::Complete)
    }

    fn name(&self) -> &'static str {
        "ObjectSink"
    }
}

/// Builds one join hash table from the build side of a broadcast join.
pub struct JoinMapSink {
    hash: usize,
    keep: Vec<usize>,
}

impl JoinMapSink {
    /// Creates a sink keyed by column `hash`, storing `keep`.
    pub fn new(hash: usize, keep: Vec<usize>) -> Self {
        Self { hash, keep }
    }
}

impl ComputeSink for JoinMapSink {
    fn create_new_output_container(&self) -> Container {
        Container::JoinMap(JoinMap::new())
    }

    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress> {
        let hashes = input.column_checked(self.hash, self.name())?;
        for &c in &self.keep {
            input.column_checked(c, self.name())?;
        }
        let map = match output {
            Container::JoinMap(map) => map,
            other => return Err(wrong_container(self.name(), other)),
        };
        for row in from_row..input.num_rows() {
            let hash = hash_at(hashes, row)?;
            let record = input.gather(row, &self.keep);
            if !charge(block, map.insert_cost(hash, &record))? {
                return Ok(WriteProgress::Full { next_row: row });
            }
            map.insert(hash, record);
        }
        Ok(WriteProgress::Complete)
    }

    fn name(&self) -> &'static str {
        "JoinMapSink"
    }
}

/// Builds one partial join hash table per partition (hash-partitioned build).
pub struct PartitionedJoinMapSink {
    hash: usize,
    keep: Vec<usize>,
    num_partitions: usize,
}

impl PartitionedJoinMapSink {
    /// Creates a sink routing each row to `hash % num_partitions`.
    pub fn new(hash: usize, keep: Vec<usize>, num_partitions: usize) -> Self {
        Self {
            hash,
            keep,
            num_partitions: num_partitions.max(1),
        }
    }
}

impl ComputeSink for PartitionedJoinMapSink {
    fn create_new_output_container(&self) -> Container {
        Container::PartitionedJoinMaps(vec![JoinMap::new(); self.num_partitions])
    }

    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress> {
        let hashes = input.column_checked(self.hash, self.name())?;
        for &c in &self.keep {
            input.column_checked(c, self.name())?;
        }
        let maps = match output {
            Container::PartitionedJoinMaps(maps) => maps,
            other => return Err(wrong_container(self.name(), other)),
        };
        if maps.len() != self.num_partitions {
            return Err(Error::Internal(format!(
                "container has {} partitions, sink expects {}",
                maps.len(),
                self.num_partitions
            )));
        }
        for row in from_row..input.num_rows() {
            let hash = hash_at(hashes, row)?;
            let map = &mut maps[partition_of(hash, self.num_partitions)];
            let record = input.gather(row, &self.keep);
            if !charge(block, map.insert_cost(hash, &record))? {
                return Ok(WriteProgress::Full { next_row: row });
            }
            map.insert(hash, record);
        }
        Ok(WriteProgress::Complete)
    }

    fn name(&self) -> &'static str {
        "PartitionedJoinMapSink"
    }
}

/// Routes whole rows to their partition, for the probe side of a
/// hash-partitioned join.
pub struct RepartitionSink {
    hash: usize,
    num_partitions: usize,
}

impl RepartitionSink {
    /// Creates a sink routing each row by column `hash`.
    pub fn new(hash: usize, num_partitions: usize) -> Self {
        Self {
            hash,
            num_partitions: num_partitions.max(1),
        }
    }
}

impl ComputeSink for RepartitionSink {
    fn create_new_output_container(&self) -> Container {
        Container::PartitionedRows(vec![Vec::new(); self.num_partitions])
    }

    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress> {
        let hashes = input.column_checked(self.hash, self.name())?;
        let parts = match output {
            Container::PartitionedRows(parts) => parts,
            other => return Err(wrong_container(self.name(), other)),
        };
        if parts.len() != self.num_partitions {
            return Err(Error::Internal(format!(
                "container has {} partitions, sink expects {}",
                parts.len(),
                self.num_partitions
            )));
        }
        for row in from_row..input.num_rows() {
            let hash = hash_at(hashes, row)?;
            let record: Row = input.row(row);
            if !charge(block, row_footprint(&record))? {
                return Ok(WriteProgress::Full { next_row: row });
            }
            parts[partition_of(hash, self.num_partitions)].push(record);
        }
        Ok(WriteProgress::Complete)
    }

    fn name(&self) -> &'static str {
        "RepartitionSink"
    }
}

/// Pre-aggregates `(key, value)` pairs into one partial accumulator per
/// partition.
pub struct AggregationSink {
    key: usize,
    value: usize,
    hash: usize,
    num_partitions: usize,
    combine: CombineFn,
}

impl AggregationSink {
    /// Creates a sink reading the key, value and hash columns.
    pub fn new(
        key: usize,
        value: usize,
        hash: usize,
        num_partitions: usize,
        combine: CombineFn,
    ) -> Self {
        Self {
            key,
            value,
            hash,
            num_partitions: num_partitions.max(1),
            combine,
        }
    }
}

impl ComputeSink for AggregationSink {
    fn create_new_output_container(&self) -> Container {
        Container::PartitionedAggregates(vec![AggMap::new(); self.num_partitions])
    }

    fn write_out(
        &mut self,
        input: &TupleSet,
        from_row: usize,
        output: &mut Container,
        block: &mut AllocationBlock,
    ) -> Result<WriteProgress> {
        let keys = input.column_checked(self.key, self.name())?;
        let values = input.column_checked(self.value, self.name())?;
        let hashes = input.column_checked(self.hash, self.name())?;
        let maps = match output {
            Container::PartitionedAggregates(maps) => maps,
            other => return Err(wrong_container(self.name(), other)),
        };
        if maps.len() != self.num_partitions {
            return Err(Error::Internal(format!(
                "container has {} partitions, sink expects {}",
                maps.len(),
                self.num_partitions
            )));
        }
        for row in from_row..input.num_rows() {
            let hash = hash_at(hashes, row)?;
            let map = &mut maps[partition_of(hash, self.num_partitions)];
            if !charge(block, map.insert_cost(&keys[row], &values[row]))? {
                return Ok(WriteProgress::Full { next_row: row });
            }
            map.combine(keys[row].clone(), values[row].clone(), &self.combine)?;
        }
        Ok(WriteProgress::Complete)
    }

    fn name(&self) -> &'static str {
        "AggregationSink"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tcapflow_common::memory::RuntimeContext;
    use tcapflow_common::utils::hash::hash_value;

    fn hashed(keys: &[i64]) -> TupleSet {
        TupleSet::new(vec![
            keys.iter().map(|k| Value::Int64(*k)).collect(),
            keys.iter().map(|k| Value::UInt64(hash_value(&Value::Int64(*k)))).collect(),
        ])
        .unwrap()
    }

    #[test]
    fn test_object_sink_reports_full() {
        let ctx = RuntimeContext::new(1 << 20, 64);
        let mut block = ctx.allocate_block().unwrap();
        let mut sink = ObjectSink::new(vec![0]);
        let mut out = sink.create_new_output_container();

        let input = TupleSet::from_column((0..10).map(Value::Int64).collect());
        let progress = sink.write_out(&input, 0, &mut out, &mut block).unwrap();
        let WriteProgress::Full { next_row } = progress else {
            panic!("expected the page to fill up");
        };
        assert_eq!(out.record_count(), next_row);

        let mut fresh = ctx.allocate_block().unwrap();
        let mut second = sink.create_new_output_container();
        let progress = sink
            .write_out(&input, next_row, &mut second, &mut fresh)
            .unwrap();
        assert!(matches!(progress, WriteProgress::Full { .. } | WriteProgress::Complete));
        assert!(second.record_count() > 0);
    }

    #[test]
    fn test_object_sink_wide_rows_become_lists() {
        let ctx = RuntimeContext::new(1 << 20, 4096);
        let mut block = ctx.allocate_block().unwrap();
        let mut sink = ObjectSink::new(vec![1, 0]);
        let mut out = sink.create_new_output_container();
        let input = TupleSet::new(vec![vec![Value::Int64(1)], vec![Value::from("a")]]).unwrap();

        assert_eq!(
            sink.write_out(&input, 0, &mut out, &mut block).unwrap(),
            WriteProgress::Complete
        );
        assert_eq!(
            out.into_objects().unwrap(),
            vec![Value::List(vec![Value::from("a"), Value::Int64(1)])]
        );
    }

    #[test]
    fn test_partitioned_join_sink_routes_rows() {
        let ctx = RuntimeContext::new(1 << 20, 1 << 16);
        let mut block = ctx.allocate_block().unwrap();
        let mut sink = PartitionedJoinMapSink::new(1, vec![0], 4);
        let mut out = sink.create_new_output_container();

        let keys: Vec<i64> = (0..100).collect();
        sink.write_out(&hashed(&keys), 0, &mut out, &mut block).unwrap();

        let Container::PartitionedJoinMaps(maps) = &out else {
            panic!("wrong container");
        };
        assert_eq!(maps.iter().map(JoinMap::len).sum::<usize>(), 100);
        for (p, map) in maps.iter().enumerate() {
            for (hash, _) in map.iter() {
                assert_eq!(partition_of(hash, 4), p);
            }
        }
    }

    #[test]
    fn test_repartition_sink_keeps_all_columns() {
        let ctx = RuntimeContext::new(1 << 20, 1 << 16);
        let mut block = ctx.allocate_block().unwrap();
        let mut sink = RepartitionSink::new(1, 3);
        let mut out = sink.create_new_output_container();
        sink.write_out(&hashed(&[1, 2, 3, 4]), 0, &mut out, &mut block)
            .unwrap();

        let Container::PartitionedRows(parts) = out else {
            panic!("wrong container");
        };
        assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), 4);
        assert!(parts.iter().flatten().all(|row| row.len() == 2));
    }

    #[test]
    fn test_aggregation_sink_combines_within_page() {
        let ctx = RuntimeContext::new(1 << 20, 1 << 16);
        let mut block = ctx.allocate_block().unwrap();
        let count: CombineFn = Arc::new(|a: &Value, b: &Value| {
            Ok(Value::Int64(a.as_int64().unwrap_or(0) + b.as_int64().unwrap_or(0)))
        });
        let mut sink = AggregationSink::new(0, 1, 2, 2, count);
        let mut out = sink.create_new_output_container();

        let keys = [Value::from("a"), Value::from("b"), Value::from("a")];
        let input = TupleSet::new(vec![
            keys.to_vec(),
            vec![Value::Int64(1); 3],
            keys.iter().map(|k| Value::UInt64(hash_value(k))).collect(),
        ])
        .unwrap();
        sink.write_out(&input, 0, &mut out, &mut block).unwrap();

        let Container::PartitionedAggregates(maps) = out else {
            panic!("wrong container");
        };
        let total: Vec<(Value, Value)> = maps
            .iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect();
        assert_eq!(total.len(), 2);
        assert!(total.contains(&(Value::from("a"), Value::Int64(2))));
    }

    #[test]
    fn test_sink_rejects_wrong_container() {
        let ctx = RuntimeContext::new(1 << 20, 1024);
        let mut block = ctx.allocate_block().unwrap();
        let mut sink = JoinMapSink::new(1, vec![0]);
        let mut wrong = Container::Objects(vec![]);
        assert!(sink.write_out(&hashed(&[1]), 0, &mut wrong, &mut block).is_err());
    }
}
