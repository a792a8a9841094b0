//! Process-wide runtime context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::PageId;
use crate::utils::error::Result;

use super::block::AllocationBlock;
use super::budget::{MemoryBudget, MemoryGrant};

/// Shared state every component that creates records needs: the memory
/// budget, the default page size, and the page id sequence.
///
/// A context is created once per process (or per test) and passed
/// explicitly; there is no global instance.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    budget: Arc<MemoryBudget>,
    page_size: usize,
    next_page_id: Arc<AtomicU64>,
}

impl RuntimeContext {
    /// Creates a context with a `memory_limit` byte budget and the given
    /// default page size.
    #[must_use]
    pub fn new(memory_limit: usize, page_size: usize) -> Self {
        Self {
            budget: MemoryBudget::new(memory_limit),
            page_size,
            next_page_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The shared budget.
    #[must_use]
    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    /// Default page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Hands out a fresh page id.
    pub fn next_page_id(&self) -> PageId {
        PageId(self.next_page_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Reserves raw bytes from the budget.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if the budget is exhausted.
    pub fn reserve(&self, bytes: usize) -> Result<MemoryGrant> {
        self.budget.try_reserve(bytes)
    }

    /// Allocates a block of the default page size.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if the budget is exhausted.
    pub fn allocate_block(&self) -> Result<AllocationBlock> {
        self.allocate_block_with_capacity(self.page_size)
    }

    /// Allocates a block of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if the budget is exhausted.
    pub fn allocate_block_with_capacity(&self, capacity: usize) -> Result<AllocationBlock> {
        let grant = self.budget.try_reserve(capacity)?;
        Ok(AllocationBlock::new(self.next_page_id(), grant))
    }

    /// Runs `f` inside a scoped block of `capacity` bytes.
    ///
    /// The block is torn down when `f` returns, whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// Fails if the block cannot be allocated, or with whatever `f` returns.
    pub fn with_block<T>(
        &self,
        capacity: usize,
        f: impl FnOnce(&mut AllocationBlock) -> Result<T>,
    ) -> Result<T> {
        let mut block = self.allocate_block_with_capacity(capacity)?;
        f(&mut block)
    }
}
