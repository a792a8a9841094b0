//! Set statistics.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tcapflow_common::types::SetIdentifier;

/// Size of one stored set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStats {
    /// Encoded bytes across all pages.
    pub num_bytes: usize,
    /// Number of pages.
    pub num_pages: usize,
}

/// Sizes of the stored sets a plan reads.
///
/// Sets without an entry cost nothing, so an empty `Statistics` makes every
/// join a broadcast join.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    sets: HashMap<SetIdentifier, SetStats>,
}

impl Statistics {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the size of `set`.
    pub fn insert(&mut self, set: SetIdentifier, stats: SetStats) {
        self.sets.insert(set, stats);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_set(mut self, set: SetIdentifier, num_bytes: usize, num_pages: usize) -> Self {
        self.insert(
            set,
            SetStats {
                num_bytes,
                num_pages,
            },
        );
        self
    }

    /// The recorded size of `set`.
    #[must_use]
    pub fn get(&self, set: &SetIdentifier) -> Option<SetStats> {
        self.sets.get(set).copied()
    }

    /// The cost of scanning `set`, in bytes.
    #[must_use]
    pub fn cost(&self, set: &SetIdentifier) -> usize {
        self.get(set).map_or(0, |s| s.num_bytes)
    }

    /// Number of sets with statistics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Returns true if no set has statistics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
