//! Bounded blocking page queue between a dispatcher and one worker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tcapflow_common::utils::error::{Error, Result};

use super::{PageIterator, SharedPage};
use crate::workers::CancellationToken;

/// How often a blocked producer or consumer re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

struct BufferState {
    pages: VecDeque<SharedPage>,
    closed: bool,
}

/// A bounded FIFO of pages.
///
/// [`add_page_to_tail`](Self::add_page_to_tail) blocks while the buffer is
/// full and [`pop_page_from_head`](Self::pop_page_from_head) blocks while it
/// is empty and still open. After [`close`](Self::close) the consumer drains
/// whatever is buffered and then sees the end of the stream. Both sides give
/// up with [`Error::Cancelled`] once the shared token is cancelled.
pub struct PageCircularBuffer {
    state: Mutex<BufferState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    cancel: CancellationToken,
}

impl PageCircularBuffer {
    /// Creates a buffer holding at most `capacity` pages.
    #[must_use]
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                pages: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            cancel,
        }
    }

    /// Appends a page, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires while waiting, and an
    /// execution error if the buffer was already closed.
    pub fn add_page_to_tail(&self, page: SharedPage) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if state.closed {
                return Err(Error::execution("page added to a closed buffer"));
            }
            if state.pages.len() < self.capacity {
                break;
            }
            self.not_full.wait_for(&mut state, CANCEL_POLL);
        }
        state.pages.push_back(page);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest page, waiting while the buffer is empty and open.
    ///
    /// Returns `Ok(None)` once the buffer is closed and drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires.
    pub fn pop_page_from_head(&self) -> Result<Option<SharedPage>> {
        let mut state = self.state.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(page) = state.pages.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(Some(page));
            }
            if state.closed {
                return Ok(None);
            }
            self.not_empty.wait_for(&mut state, CANCEL_POLL);
        }
    }

    /// Marks the end of the stream and wakes every waiter.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns true once the buffer is closed and empty.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.pages.is_empty()
    }

    /// Pages currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Returns true if no page is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum pages buffered.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer-side view of a [`PageCircularBuffer`].
pub struct PageCircularBufferIterator {
    buffer: Arc<PageCircularBuffer>,
}

impl PageCircularBufferIterator {
    /// Wraps a shared buffer.
    #[must_use]
    pub fn new(buffer: Arc<PageCircularBuffer>) -> Self {
        Self { buffer }
    }
}

impl PageIterator for PageCircularBufferIterator {
    fn next_page(&mut self) -> Result<Option<SharedPage>> {
        self.buffer.pop_page_from_head()
    }
}
