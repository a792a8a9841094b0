//! Pages and the buffers that move them between threads.
//!
//! - [`Page`] - a checksummed encoding of one output container
//! - [`SharedPage`] - a pinned page shared by several consumers
//! - [`PageCircularBuffer`] - bounded blocking FIFO feeding one worker
//! - [`PageIterator`] - pull interface every page source implements

mod circular;
mod page;

pub use circular::{PageCircularBuffer, PageCircularBufferIterator};
pub use page::{Page, PinnedPage, SharedPage, UnpinFn};

use std::collections::VecDeque;

use tcapflow_common::utils::error::Result;

/// Pulls pages one at a time.
pub trait PageIterator: Send {
    /// Returns the next page, or `None` when the stream is exhausted.
    fn next_page(&mut self) -> Result<Option<SharedPage>>;
}

/// Iterates pages already held in memory.
#[derive(Debug, Default)]
pub struct VecPageIterator {
    pages: VecDeque<SharedPage>,
}

impl VecPageIterator {
    /// Creates an iterator over `pages`, in order.
    #[must_use]
    pub fn new(pages: Vec<SharedPage>) -> Self {
        Self {
            pages: pages.into(),
        }
    }
}

impl PageIterator for VecPageIterator {
    fn next_page(&mut self) -> Result<Option<SharedPage>> {
        Ok(self.pages.pop_front())
    }
}
