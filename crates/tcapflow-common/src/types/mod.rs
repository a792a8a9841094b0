//! Core type definitions for Tcapflow.
//!
//! - Record values ([`Value`], [`Row`])
//! - Schema slices ([`TupleSpec`])
//! - Identifiers ([`SetIdentifier`], [`PageId`])

mod tuple_spec;
mod value;

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use tuple_spec::TupleSpec;
pub use value::{VALUE_OVERHEAD, Value};

/// One record of a tuple set, as stored in pages and hash tables.
pub type Row = SmallVec<[Value; 4]>;

/// Approximate byte footprint of a row.
#[must_use]
pub fn row_footprint(row: &[Value]) -> usize {
    8 + row.iter().map(Value::footprint).sum::<usize>()
}

/// Identifies a stored set by database and set name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetIdentifier {
    /// Database name.
    pub db: String,
    /// Set name within the database.
    pub set: String,
}

impl SetIdentifier {
    /// Creates a new set identifier.
    pub fn new(db: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            set: set.into(),
        }
    }
}

impl fmt::Display for SetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.db, self.set)
    }
}

/// Identifier of a page or allocation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}
