//! Compute sources: where a pipeline's batches come from.

use std::collections::VecDeque;
use std::sync::Arc;

use tcapflow_common::types::{Row, Value};
use tcapflow_common::utils::error::{Error, Result};

use super::{AggMap, Container, TupleSet, TupleSetBuilder};
use crate::buffer::{PageIterator, SharedPage};

/// Turns one aggregation group into the user-visible output object.
pub type FinalizeFn = Arc<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;

/// Produces the batches that enter a pipeline.
pub trait ComputeSource: Send {
    /// Returns the next batch, or `None` once the input is exhausted.
    fn next_tuple_set(&mut self) -> Result<Option<TupleSet>>;

    /// Changes the maximum number of rows per batch.
    fn set_chunk_size(&mut self, rows: usize);

    /// Returns the name of this source for debugging.
    fn name(&self) -> &'static str;
}

/// Holds the page whose rows are being served, so it stays pinned until its
/// last row has been handed out.
struct LoadedPage<T> {
    _page: SharedPage,
    items: VecDeque<T>,
}

/// Reads stored objects, one column per batch.
pub struct ObjectSource {
    pages: Box<dyn PageIterator>,
    current: Option<LoadedPage<Value>>,
    chunk_size: usize,
}

impl ObjectSource {
    /// Creates a source over pages of [`Container::Objects`].
    pub fn new(pages: Box<dyn PageIterator>, chunk_size: usize) -> Self {
        Self {
            pages,
            current: None,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ComputeSource for ObjectSource {
    fn next_tuple_set(&mut self) -> Result<Option<TupleSet>> {
        loop {
            if let Some(loaded) = &mut self.current {
                if !loaded.items.is_empty() {
                    let take = self.chunk_size.min(loaded.items.len());
                    let values: Vec<Value> = loaded.items.drain(..take).collect();
                    return Ok(Some(TupleSet::from_column(values)));
                }
                self.current = None;
            }
            let Some(page) = self.pages.next_page()? else {
                return Ok(None);
            };
            let items = page.page().decode()?.into_objects()?;
            self.current = Some(LoadedPage {
                _page: page,
                items: items.into(),
            });
        }
    }

    fn set_chunk_size(&mut self, rows: usize) {
        self.chunk_size = rows.max(1);
    }

    fn name(&self) -> &'static str {
        "ObjectSource"
    }
}

/// Reads one partition of repartitioned rows.
pub struct RowSource {
    pages: Box<dyn PageIterator>,
    partition: usize,
    width: usize,
    current: Option<LoadedPage<Row>>,
    chunk_size: usize,
}

impl RowSource {
    /// Creates a source over pages of [`Container::PartitionedRows`], reading
    /// only `partition`. Every row must hold `width` values.
    pub fn new(
        pages: Box<dyn PageIterator>,
        partition: usize,
        width: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            pages,
            partition,
            width,
            current: None,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ComputeSource for RowSource {
    fn next_tuple_set(&mut self) -> Result<Option<TupleSet>> {
        loop {
            if let Some(loaded) = &mut self.current {
                if !loaded.items.is_empty() {
                    let take = self.chunk_size.min(loaded.items.len());
                    let mut builder = TupleSetBuilder::new(self.width);
                    for row in loaded.items.drain(..take) {
                        builder.push_row(row)?;
                    }
                    return Ok(Some(builder.finish()));
                }
                self.current = None;
            }
            let Some(page) = self.pages.next_page()? else {
                return Ok(None);
            };
            let rows = match page.page().decode()? {
                Container::PartitionedRows(mut parts) => {
                    if self.partition >= parts.len() {
                        return Err(Error::execution(format!(
                            "partition {} out of range for a page with {} partitions",
                            self.partition,
                            parts.len()
                        )));
                    }
                    parts.swap_remove(self.partition)
                }
                other => return Err(Error::type_mismatch("PartitionedRows", other.kind())),
            };
            self.current = Some(LoadedPage {
                _page: page,
                items: rows.into(),
            });
        }
    }

    fn set_chunk_size(&mut self, rows: usize) {
        self.chunk_size = rows.max(1);
    }

    fn name(&self) -> &'static str {
        "RowSource"
    }
}

/// Reads finished aggregation groups and finalizes each into one object.
pub struct AggregateSource {
    maps: Arc<Vec<AggMap>>,
    partitions: VecDeque<usize>,
    pending: VecDeque<Value>,
    finalize: FinalizeFn,
    chunk_size: usize,
}

impl AggregateSource {
    /// Creates a source over `maps`; `partition` restricts it to one
    /// partition, otherwise every partition is read in order.
    pub fn new(
        maps: Arc<Vec<AggMap>>,
        partition: Option<usize>,
        finalize: FinalizeFn,
        chunk_size: usize,
    ) -> Self {
        let partitions = match partition {
            Some(p) => VecDeque::from([p]),
            None => (0..maps.len()).collect(),
        };
        Self {
            maps,
            partitions,
            pending: VecDeque::new(),
            finalize,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ComputeSource for AggregateSource {
    fn next_tuple_set(&mut self) -> Result<Option<TupleSet>> {
        while self.pending.is_empty() {
            let Some(p) = self.partitions.pop_front() else {
                return Ok(None);
            };
            let map = self.maps.get(p).ok_or_else(|| {
                Error::execution(format!(
                    "aggregation partition {p} out of range ({} partitions)",
                    self.maps.len()
                ))
            })?;
            for (key, value) in map.iter() {
                self.pending.push_back((self.finalize)(key, value)?);
            }
        }
        let take = self.chunk_size.min(self.pending.len());
        let values: Vec<Value> = self.pending.drain(..take).collect();
        Ok(Some(TupleSet::from_column(values)))
    }

    fn set_chunk_size(&mut self, rows: usize) {
        self.chunk_size = rows.max(1);
    }

    fn name(&self) -> &'static str {
        "AggregateSource"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Page, PinnedPage, VecPageIterator};
    use crate::execution::CombineFn;
    use smallvec::smallvec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tcapflow_common::types::PageId;

    fn object_page(id: u64, values: Vec<Value>) -> SharedPage {
        let page = Page::encode(PageId(id), &Container::Objects(values)).unwrap();
        PinnedPage::unmanaged(page)
    }

    #[test]
    fn test_object_source_batches_across_pages() {
        let pages = vec![
            object_page(1, (0..5).map(Value::Int64).collect()),
            object_page(2, vec![]),
            object_page(3, (5..8).map(Value::Int64).collect()),
        ];
        let mut source = ObjectSource::new(Box::new(VecPageIterator::new(pages)), 2);

        let mut sizes = Vec::new();
        let mut values = Vec::new();
        while let Some(batch) = source.next_tuple_set().unwrap() {
            sizes.push(batch.num_rows());
            values.extend_from_slice(batch.column(0).unwrap());
        }
        assert_eq!(sizes, vec![2, 2, 1, 2, 1]);
        assert_eq!(values, (0..8).map(Value::Int64).collect::<Vec<_>>());
    }

    #[test]
    fn test_object_source_unpins_after_last_row() {
        let unpinned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unpinned);
        let page = Page::encode(PageId(1), &Container::Objects(vec![Value::Int64(1)])).unwrap();
        let shared = PinnedPage::new(
            page,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let mut source = ObjectSource::new(Box::new(VecPageIterator::new(vec![shared])), 8);

        assert!(source.next_tuple_set().unwrap().is_some());
        assert_eq!(unpinned.load(Ordering::SeqCst), 0);
        assert!(source.next_tuple_set().unwrap().is_none());
        assert_eq!(unpinned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_row_source_reads_one_partition() {
        let container = Container::PartitionedRows(vec![
            vec![smallvec![Value::Int64(1), Value::from("a")]],
            vec![
                smallvec![Value::Int64(2), Value::from("b")],
                smallvec![Value::Int64(3), Value::from("c")],
            ],
        ]);
        let page = PinnedPage::unmanaged(Page::encode(PageId(9), &container).unwrap());
        let mut source = RowSource::new(Box::new(VecPageIterator::new(vec![page])), 1, 2, 16);

        let batch = source.next_tuple_set().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(1).unwrap(), &[Value::from("b"), Value::from("c")]);
        assert!(source.next_tuple_set().unwrap().is_none());
    }

    #[test]
    fn test_row_source_rejects_objects() {
        let mut source = RowSource::new(
            Box::new(VecPageIterator::new(vec![object_page(1, vec![Value::Null])])),
            0,
            1,
            16,
        );
        assert!(matches!(
            source.next_tuple_set(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregate_source_finalizes_groups() {
        let sum: CombineFn = Arc::new(|a: &Value, b: &Value| {
            Ok(Value::Int64(a.as_int64().unwrap_or(0) + b.as_int64().unwrap_or(0)))
        });
        let mut left = AggMap::new();
        left.combine(Value::from("x"), Value::Int64(2), &sum).unwrap();
        left.combine(Value::from("x"), Value::Int64(3), &sum).unwrap();
        let mut right = AggMap::new();
        right.combine(Value::from("y"), Value::Int64(7), &sum).unwrap();

        let finalize: FinalizeFn =
            Arc::new(|k: &Value, v: &Value| Ok(Value::List(vec![k.clone(), v.clone()])));
        let mut source = AggregateSource::new(Arc::new(vec![left, right]), None, finalize, 1);

        let mut out = Vec::new();
        while let Some(batch) = source.next_tuple_set().unwrap() {
            out.extend_from_slice(batch.column(0).unwrap());
        }
        assert_eq!(
            out,
            vec![
                Value::List(vec![Value::from("x"), Value::Int64(5)]),
                Value::List(vec![Value::from("y"), Value::Int64(7)]),
            ]
        );
    }
}
