//! The storage collaborator job stages read from and write to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tcapflow_common::types::{PageId, SetIdentifier, Value};
use tcapflow_common::utils::error::{Error, Result};
use tcapflow_core::buffer::{Page, PinnedPage, SharedPage};
use tcapflow_core::execution::Container;

use crate::physical::SetStats;

/// Stored sets of encoded pages.
pub trait SetStore: Send + Sync {
    /// Creates `set` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot create sets.
    fn create_set(&self, set: &SetIdentifier) -> Result<()>;

    /// Appends a page to `set`.
    ///
    /// # Errors
    ///
    /// Fails if `set` does not exist.
    fn add_page(&self, set: &SetIdentifier, page: Page) -> Result<()>;

    /// Pins every page of `set`, in insertion order. A page is unpinned when
    /// its last handle drops.
    ///
    /// # Errors
    ///
    /// Fails if `set` does not exist.
    fn pinned_pages(&self, set: &SetIdentifier) -> Result<Vec<SharedPage>>;

    /// Removes `set`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot remove sets.
    fn remove_set(&self, set: &SetIdentifier) -> Result<bool>;

    /// Size of `set`, if it exists.
    fn stats(&self, set: &SetIdentifier) -> Option<SetStats>;
}

/// An in-memory [`SetStore`].
#[derive(Default)]
pub struct MemoryStore {
    sets: RwLock<HashMap<SetIdentifier, Vec<Page>>>,
    pinned: Arc<AtomicUsize>,
    next_page_id: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `values` into `set`, `per_page` objects per page, creating the
    /// set if needed.
    ///
    /// # Errors
    ///
    /// Fails if a page cannot be encoded.
    pub fn store_objects(
        &self,
        set: &SetIdentifier,
        values: Vec<Value>,
        per_page: usize,
    ) -> Result<()> {
        self.create_set(set)?;
        let mut values = values.into_iter().peekable();
        while values.peek().is_some() {
            let chunk: Vec<Value> = values.by_ref().take(per_page.max(1)).collect();
            let id = PageId(self.next_page_id.fetch_add(1, Ordering::Relaxed));
            self.add_page(set, Page::encode(id, &Container::Objects(chunk))?)?;
        }
        Ok(())
    }

    /// Decodes every object of `set`, in page order.
    ///
    /// # Errors
    ///
    /// Fails if the set does not exist or holds something other than
    /// objects.
    pub fn read_objects(&self, set: &SetIdentifier) -> Result<Vec<Value>> {
        let sets = self.sets.read();
        let pages = sets.get(set).ok_or_else(|| missing(set))?;
        let mut objects = Vec::new();
        for page in pages {
            objects.extend(page.decode()?.into_objects()?);
        }
        Ok(objects)
    }

    /// Names of all stored sets, sorted.
    #[must_use]
    pub fn sets(&self) -> Vec<SetIdentifier> {
        let mut sets: Vec<SetIdentifier> = self.sets.read().keys().cloned().collect();
        sets.sort();
        sets
    }

    /// Number of pages currently pinned.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        self.pinned.load(Ordering::Acquire)
    }
}

fn missing(set: &SetIdentifier) -> Error {
    Error::execution(format!("set {set} does not exist"))
}

impl SetStore for MemoryStore {
    fn create_set(&self, set: &SetIdentifier) -> Result<()> {
        self.sets.write().entry(set.clone()).or_default();
        Ok(())
    }

    fn add_page(&self, set: &SetIdentifier, page: Page) -> Result<()> {
        self.sets
            .write()
            .get_mut(set)
            .ok_or_else(|| missing(set))?
            .push(page);
        Ok(())
    }

    fn pinned_pages(&self, set: &SetIdentifier) -> Result<Vec<SharedPage>> {
        let sets = self.sets.read();
        let pages = sets.get(set).ok_or_else(|| missing(set))?;
        Ok(pages
            .iter()
            .map(|page| {
                self.pinned.fetch_add(1, Ordering::AcqRel);
                let pinned = Arc::clone(&self.pinned);
                PinnedPage::new(
                    page.clone(),
                    Box::new(move |_| {
                        pinned.fetch_sub(1, Ordering::AcqRel);
                    }),
                )
            })
            .collect())
    }

    fn remove_set(&self, set: &SetIdentifier) -> Result<bool> {
        Ok(self.sets.write().remove(set).is_some())
    }

    fn stats(&self, set: &SetIdentifier) -> Option<SetStats> {
        self.sets.read().get(set).map(|pages| SetStats {
            num_bytes: pages.iter().map(Page::len).sum(),
            num_pages: pages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_read_objects() {
        let store = MemoryStore::new();
        let set = SetIdentifier::new("db", "numbers");
        store
            .store_objects(&set, (0..10).map(Value::Int64).collect(), 4)
            .unwrap();

        let stats = store.stats(&set).unwrap();
        assert_eq!(stats.num_pages, 3);
        assert!(stats.num_bytes > 0);
        assert_eq!(
            store.read_objects(&set).unwrap(),
            (0..10).map(Value::Int64).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_pins_released_with_last_handle() {
        let store = MemoryStore::new();
        let set = SetIdentifier::new("db", "numbers");
        store
            .store_objects(&set, (0..6).map(Value::Int64).collect(), 2)
            .unwrap();

        let pages = store.pinned_pages(&set).unwrap();
        let extra = Arc::clone(&pages[0]);
        assert_eq!(store.pinned_count(), 3);
        drop(pages);
        assert_eq!(store.pinned_count(), 1);
        drop(extra);
        assert_eq!(store.pinned_count(), 0);
    }

    #[test]
    fn test_missing_set() {
        let store = MemoryStore::new();
        let set = SetIdentifier::new("db", "nope");
        assert!(store.pinned_pages(&set).is_err());
        assert!(store.stats(&set).is_none());
        assert!(!store.remove_set(&set).unwrap());
        store.create_set(&set).unwrap();
        store.create_set(&set).unwrap();
        assert_eq!(store.stats(&set).unwrap().num_pages, 0);
    }
}
