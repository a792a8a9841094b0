//! Byte-level memory accounting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::error::{Error, Result};

/// A shared memory budget.
///
/// Components reserve bytes through [`MemoryBudget::try_reserve`] and get a
/// [`MemoryGrant`] back. The bytes return to the budget when the grant is
/// dropped, on every exit path.
pub struct MemoryBudget {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryBudget {
    /// Creates a budget of `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
        })
    }

    /// Total bytes this budget can hand out.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    /// Reserves `bytes` from the budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the budget cannot cover the request.
    pub fn try_reserve(self: &Arc<Self>, bytes: usize) -> Result<MemoryGrant> {
        self.acquire(bytes)?;
        Ok(MemoryGrant {
            budget: Arc::clone(self),
            size: bytes,
        })
    }

    fn acquire(&self, bytes: usize) -> Result<()> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(bytes).filter(|n| *n <= self.limit);
            let Some(next) = next else {
                return Err(Error::OutOfMemory {
                    requested: bytes,
                    available: self.limit.saturating_sub(current),
                });
            };
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("limit", &self.limit)
            .field("used", &self.used())
            .finish()
    }
}

/// Bytes reserved from a [`MemoryBudget`], released on drop.
pub struct MemoryGrant {
    budget: Arc<MemoryBudget>,
    size: usize,
}

impl MemoryGrant {
    /// Size of the grant in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Grows the grant by `extra` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the budget cannot cover the growth;
    /// the grant keeps its previous size.
    pub fn grow(&mut self, extra: usize) -> Result<()> {
        self.budget.acquire(extra)?;
        self.size += extra;
        Ok(())
    }

    /// Returns part of the grant to the budget early.
    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.size);
        self.budget.release(bytes);
        self.size -= bytes;
    }
}

impl Drop for MemoryGrant {
    fn drop(&mut self) {
        if self.size > 0 {
            self.budget.release(self.size);
        }
    }
}

impl fmt::Debug for MemoryGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGrant").field("size", &self.size).finish()
    }
}
