//! Named hash sets and the registry that owns them.
//!
//! A hash set is built once by a join-build or aggregation job stage and
//! then read by any number of probe pipelines. The [`HashSetManager`] hands
//! out names as exclusive leases: reserving a name that is already reserved
//! or published fails fast with [`Error::HashSetNameConflict`].

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tcapflow_common::memory::MemoryGrant;
use tcapflow_common::types::Row;
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_common::utils::hash::partition_of;

use crate::execution::{AggMap, JoinMap};

/// A built join hash table, as seen by probe stages.
#[derive(Debug, Clone)]
pub enum JoinTable {
    /// One table sized for the whole build side (broadcast build).
    Shared(Arc<JoinMap>),
    /// One table per partition (hash-partitioned build).
    Partitioned(Arc<Vec<JoinMap>>),
}

impl JoinTable {
    /// Rows whose key hash equals `hash`.
    #[must_use]
    pub fn probe(&self, hash: u64) -> &[Row] {
        match self {
            JoinTable::Shared(map) => map.probe(hash),
            JoinTable::Partitioned(maps) => {
                if maps.is_empty() {
                    return &[];
                }
                maps[partition_of(hash, maps.len())].probe(hash)
            }
        }
    }

    /// Total rows across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            JoinTable::Shared(map) => map.len(),
            JoinTable::Partitioned(maps) => maps.iter().map(JoinMap::len).sum(),
        }
    }

    /// Returns true if the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of partitions (1 for a shared table).
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        match self {
            JoinTable::Shared(_) => 1,
            JoinTable::Partitioned(maps) => maps.len(),
        }
    }
}

/// What a named hash set holds.
#[derive(Debug, Clone)]
pub enum HashSetData {
    /// A join hash table.
    Join(JoinTable),
    /// Per-partition aggregation accumulators.
    Aggregate(Arc<Vec<AggMap>>),
}

/// A published hash set together with the memory backing it.
pub struct NamedHashSet {
    name: String,
    data: HashSetData,
    grants: Vec<MemoryGrant>,
}

impl NamedHashSet {
    /// Creates a hash set; `grants` are released when it is destroyed.
    pub fn new(name: impl Into<String>, data: HashSetData, grants: Vec<MemoryGrant>) -> Self {
        Self {
            name: name.into(),
            data,
            grants,
        }
    }

    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table contents.
    #[must_use]
    pub fn data(&self) -> &HashSetData {
        &self.data
    }

    /// Returns the join table, if this is one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for aggregation sets.
    pub fn join_table(&self) -> Result<JoinTable> {
        match &self.data {
            HashSetData::Join(table) => Ok(table.clone()),
            HashSetData::Aggregate(_) => Err(Error::type_mismatch("join hash set", "aggregate")),
        }
    }

    /// Returns the aggregation partitions, if this is an aggregation set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for join sets.
    pub fn aggregates(&self) -> Result<Arc<Vec<AggMap>>> {
        match &self.data {
            HashSetData::Aggregate(maps) => Ok(Arc::clone(maps)),
            HashSetData::Join(_) => Err(Error::type_mismatch("aggregate hash set", "join")),
        }
    }

    /// Bytes reserved for this set.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.grants.iter().map(MemoryGrant::size).sum()
    }
}

impl fmt::Debug for NamedHashSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedHashSet")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("reserved_bytes", &self.reserved_bytes())
            .finish()
    }
}

enum Slot {
    Building,
    Ready(Arc<NamedHashSet>),
}

/// Registry of named hash sets shared by every worker of a job stage.
#[derive(Default)]
pub struct HashSetManager {
    slots: Mutex<HashMap<String, Slot>>,
}

impl HashSetManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserves `name` for a build in progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashSetNameConflict`] if the name is taken.
    pub fn reserve(self: &Arc<Self>, name: &str) -> Result<HashSetLease> {
        let mut slots = self.slots.lock();
        if slots.contains_key(name) {
            return Err(Error::HashSetNameConflict(name.to_string()));
        }
        slots.insert(name.to_string(), Slot::Building);
        Ok(HashSetLease {
            manager: Arc::clone(self),
            name: name.to_string(),
            published: false,
        })
    }

    /// Registers a finished hash set under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashSetNameConflict`] if the name is taken.
    pub fn add(&self, set: NamedHashSet) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.contains_key(set.name()) {
            return Err(Error::HashSetNameConflict(set.name().to_string()));
        }
        slots.insert(set.name().to_string(), Slot::Ready(Arc::new(set)));
        Ok(())
    }

    /// Looks up a published hash set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<NamedHashSet>> {
        match self.slots.lock().get(name) {
            Some(Slot::Ready(set)) => Some(Arc::clone(set)),
            _ => None,
        }
    }

    /// Looks up a published hash set, failing if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashSetNotFound`].
    pub fn require(&self, name: &str) -> Result<Arc<NamedHashSet>> {
        self.get(name)
            .ok_or_else(|| Error::HashSetNotFound(name.to_string()))
    }

    /// Removes a hash set. Its memory is released once the last probe
    /// holding it lets go.
    pub fn remove(&self, name: &str) -> Option<Arc<NamedHashSet>> {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(name), Some(Slot::Ready(_))) {
            return None;
        }
        match slots.remove(name) {
            Some(Slot::Ready(set)) => {
                tracing::debug!("hash set '{}' removed", name);
                Some(set)
            }
            _ => None,
        }
    }

    /// Removes the named published hash sets, returning how many were
    /// removed. Names still being built or owned by nobody are skipped.
    pub fn remove_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> usize {
        names
            .into_iter()
            .filter(|name| self.remove(name).is_some())
            .count()
    }

    /// Names of all reserved or published sets, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of reserved or published sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no name is reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, name: &str, set: Arc<NamedHashSet>) {
        self.slots.lock().insert(name.to_string(), Slot::Ready(set));
    }

    fn release(&self, name: &str) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(name), Some(Slot::Building)) {
            slots.remove(name);
        }
    }
}

/// Exclusive claim on a hash-set name while the set is being built.
///
/// Dropping the lease without publishing frees the name again.
pub struct HashSetLease {
    manager: Arc<HashSetManager>,
    name: String,
    published: bool,
}

impl HashSetLease {
    /// The reserved name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes the finished set under the reserved name.
    pub fn publish(mut self, data: HashSetData, grants: Vec<MemoryGrant>) -> Arc<NamedHashSet> {
        let set = Arc::new(NamedHashSet::new(self.name.clone(), data, grants));
        self.manager.publish(&self.name, Arc::clone(&set));
        self.published = true;
        tracing::debug!("hash set '{}' published", self.name);
        set
    }
}

impl Drop for HashSetLease {
    fn drop(&mut self) {
        if !self.published {
            self.manager.release(&self.name);
        }
    }
}
