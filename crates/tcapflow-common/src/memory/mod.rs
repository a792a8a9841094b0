//! Memory accounting for page-bounded execution.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RuntimeContext                               │
//! │   MemoryBudget (limit, used)                 │
//! │     ├── MemoryGrant ── AllocationBlock (page) │
//! │     ├── MemoryGrant ── AllocationBlock (page) │
//! │     └── MemoryGrant ── hash set partition     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every reservation is an RAII value. Dropping a block or grant gives the
//! bytes back, so an error that unwinds a worker can never leak budget.
//!
//! # Usage
//!
//! ```
//! use tcapflow_common::memory::RuntimeContext;
//!
//! let ctx = RuntimeContext::new(64 * 1024 * 1024, 1024 * 1024);
//! let mut block = ctx.allocate_block().unwrap();
//! block.try_allocate(128).unwrap();
//! // Memory is released when the block is dropped
//! ```

mod block;
mod budget;
mod context;

pub use block::AllocationBlock;
pub use budget::{MemoryBudget, MemoryGrant};
pub use context::RuntimeContext;
