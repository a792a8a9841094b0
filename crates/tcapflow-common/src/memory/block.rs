//! Allocation blocks: page-sized arenas with scoped lifetime.

use crate::types::PageId;
use crate::utils::error::{Error, Result};

use super::budget::MemoryGrant;

/// A fixed-capacity arena that writers charge their output against.
///
/// A block owns a [`MemoryGrant`] for its full capacity, so dropping the
/// block (including on an error path) returns the bytes to the budget.
/// Allocation only moves a cursor; the caller keeps the actual data.
#[derive(Debug)]
pub struct AllocationBlock {
    id: PageId,
    capacity: usize,
    used: usize,
    grant: MemoryGrant,
}

impl AllocationBlock {
    pub(crate) fn new(id: PageId, grant: MemoryGrant) -> Self {
        Self {
            id,
            capacity: grant.size(),
            used: 0,
            grant,
        }
    }

    /// Identifier of the page this block backs.
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes allocated so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Returns true if nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Charges `bytes` against the block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnoughSpace`] if the block cannot hold `bytes`.
    /// The block is left unchanged.
    pub fn try_allocate(&mut self, bytes: usize) -> Result<()> {
        if bytes > self.remaining() {
            return Err(Error::NotEnoughSpace {
                requested: bytes,
                remaining: self.remaining(),
            });
        }
        self.used += bytes;
        Ok(())
    }

    /// Grows the block's capacity by reserving more from the budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the budget cannot cover the growth.
    pub fn grow(&mut self, extra: usize) -> Result<()> {
        self.grant.grow(extra)?;
        self.capacity += extra;
        Ok(())
    }

    /// Forgets all allocations, keeping the capacity.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
