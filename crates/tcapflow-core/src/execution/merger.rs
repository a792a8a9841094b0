//! Sink mergers fold partial containers into one accumulator.
//!
//! Shuffle pipelines write partial hash tables (or partial aggregates) page
//! by page. A build stage then reads every page back and merges it into the
//! final table: a broadcast build merges whole pages with
//! [`SinkMerger::write_out`], a hash-partitioned build merges only its own
//! partition of each page with [`SinkMerger::write_vector_out`].

use tcapflow_common::utils::error::{Error, Result};

use super::{AggMap, CombineFn, Container, JoinMap};

/// Merges partial sink output into an accumulator.
pub trait SinkMerger: Send + Sync {
    /// Creates an empty accumulator.
    fn create_new_output_container(&self) -> Container;

    /// Merges a whole partial container into `acc`.
    ///
    /// # Errors
    ///
    /// Fails if either container has the wrong kind.
    fn write_out(&self, partial: Container, acc: &mut Container) -> Result<()>;

    /// Merges partition `partition` of a partitioned container into `acc`.
    ///
    /// # Errors
    ///
    /// Fails if either container has the wrong kind or the partition is out
    /// of range.
    fn write_vector_out(&self, partials: Container, partition: usize, acc: &mut Container)
    -> Result<()>;

    /// Returns the name of this merger for debugging.
    fn name(&self) -> &'static str;
}

fn accumulator_mismatch(expected: &str, acc: &Container) -> Error {
    Error::Internal(format!(
        "accumulator must be {expected}, found {}",
        acc.kind()
    ))
}

/// Merges join hash tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct JoinSinkMerger;

impl JoinSinkMerger {
    fn merge_into(partial: JoinMap, acc: &mut Container) -> Result<()> {
        match acc {
            Container::JoinMap(map) => {
                map.merge(partial);
                Ok(())
            }
            other => Err(accumulator_mismatch("JoinMap", other)),
        }
    }
}

impl SinkMerger for JoinSinkMerger {
    fn create_new_output_container(&self) -> Container {
        Container::JoinMap(JoinMap::new())
    }

    fn write_out(&self, partial: Container, acc: &mut Container) -> Result<()> {
        Self::merge_into(partial.into_join_map()?, acc)
    }

    fn write_vector_out(
        &self,
        mut partials: Container,
        partition: usize,
        acc: &mut Container,
    ) -> Result<()> {
        let part = partials.take_partition(partition)?.into_join_map()?;
        Self::merge_into(part, acc)
    }

    fn name(&self) -> &'static str {
        "JoinSinkMerger"
    }
}

/// Merges aggregation accumulators with the aggregation's combiner.
pub struct AggregationSinkMerger {
    combine: CombineFn,
}

impl AggregationSinkMerger {
    /// Creates a merger folding values with `combine`.
    pub fn new(combine: CombineFn) -> Self {
        Self { combine }
    }

    fn merge_into(&self, partial: AggMap, acc: &mut Container) -> Result<()> {
        match acc {
            Container::Aggregates(map) => map.merge(partial, &self.combine),
            other => Err(accumulator_mismatch("Aggregates", other)),
        }
    }
}

impl SinkMerger for AggregationSinkMerger {
    fn create_new_output_container(&self) -> Container {
        Container::Aggregates(AggMap::new())
    }

    fn write_out(&self, partial: Container, acc: &mut Container) -> Result<()> {
        match partial {
            Container::Aggregates(map) => self.merge_into(map, acc),
            Container::PartitionedAggregates(maps) => {
                for map in maps {
                    self.merge_into(map, acc)?;
                }
                Ok(())
            }
            other => Err(Error::type_mismatch("Aggregates", other.kind())),
        }
    }

    fn write_vector_out(
        &self,
        mut partials: Container,
        partition: usize,
        acc: &mut Container,
    ) -> Result<()> {
        let part = partials.take_partition(partition)?.into_aggregates()?;
        self.merge_into(part, acc)
    }

    fn name(&self) -> &'static str {
        "AggregationSinkMerger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::sync::Arc;
    use tcapflow_common::types::Value;

    fn sum() -> CombineFn {
        Arc::new(|a: &Value, b: &Value| {
            Ok(Value::Int64(a.as_int64().unwrap_or(0) + b.as_int64().unwrap_or(0)))
        })
    }

    fn partial(entries: &[(&str, i64)]) -> Container {
        let combine = sum();
        let mut map = AggMap::new();
        for (k, v) in entries {
            map.combine(Value::from(*k), Value::Int64(*v), &combine).unwrap();
        }
        Container::Aggregates(map)
    }

    #[test]
    fn test_join_merger_accumulates_rows() {
        let merger = JoinSinkMerger;
        let mut acc = merger.create_new_output_container();
        for i in 0..3_i64 {
            let mut map = JoinMap::new();
            map.insert(1, smallvec![Value::Int64(i)]);
            merger.write_out(Container::JoinMap(map), &mut acc).unwrap();
        }
        let map = acc.into_join_map().unwrap();
        assert_eq!(map.probe(1).len(), 3);
    }

    #[test]
    fn test_join_merger_vector_out_takes_one_partition() {
        let merger = JoinSinkMerger;
        let mut maps = vec![JoinMap::new(), JoinMap::new()];
        maps[0].insert(10, smallvec![Value::Int64(0)]);
        maps[1].insert(11, smallvec![Value::Int64(1)]);

        let mut acc = merger.create_new_output_container();
        merger
            .write_vector_out(Container::PartitionedJoinMaps(maps), 1, &mut acc)
            .unwrap();
        let map = acc.into_join_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.probe(11).len(), 1);
    }

    #[test]
    fn test_aggregation_merge_order_independent() {
        let merger = AggregationSinkMerger::new(sum());
        let a = partial(&[("x", 1), ("y", 2)]);
        let b = partial(&[("x", 10)]);
        let c = partial(&[("y", 5), ("z", 1)]);

        let mut first = merger.create_new_output_container();
        for p in [a.clone(), b.clone(), c.clone()] {
            merger.write_out(p, &mut first).unwrap();
        }
        let mut second = merger.create_new_output_container();
        for p in [c, a, b] {
            merger.write_out(p, &mut second).unwrap();
        }
        assert_eq!(first, second);
        let merged = first.into_aggregates().unwrap();
        assert_eq!(merged.get(&Value::from("x")), Some(&Value::Int64(11)));
        assert_eq!(merged.get(&Value::from("y")), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_merger_rejects_wrong_accumulator() {
        let merger = JoinSinkMerger;
        let mut acc = Container::Objects(vec![]);
        assert!(
            merger
                .write_out(Container::JoinMap(JoinMap::new()), &mut acc)
                .is_err()
        );
    }
}
