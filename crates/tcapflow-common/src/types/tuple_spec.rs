//! Tuple-set schema slices.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// Names a tuple set and an ordered slice of its columns.
///
/// `A(a, b)` in TCAP text is `TupleSpec::new("A", ["a", "b"])`. Two specs are
/// equal when both the set name and the column list match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TupleSpec {
    set_name: String,
    atts: Vec<String>,
}

impl TupleSpec {
    /// Creates a new spec.
    pub fn new<I, S>(set_name: impl Into<String>, atts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            set_name: set_name.into(),
            atts: atts.into_iter().map(Into::into).collect(),
        }
    }

    /// A spec with no set name and no columns (used where an operator has no
    /// projection).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the tuple-set name.
    #[must_use]
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// Returns the column names, in order.
    #[must_use]
    pub fn atts(&self) -> &[String] {
        &self.atts
    }

    /// Returns true if this spec names no set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_name.is_empty() && self.atts.is_empty()
    }

    /// Returns true if both specs name the same tuple set.
    #[must_use]
    pub fn same_set(&self, other: &TupleSpec) -> bool {
        self.set_name == other.set_name
    }

    /// Position of `att` in this spec.
    #[must_use]
    pub fn position_of(&self, att: &str) -> Option<usize> {
        self.atts.iter().position(|a| a == att)
    }

    /// Returns true if every column of `self` is present in `schema`.
    #[must_use]
    pub fn is_subset_of(&self, schema: &TupleSpec) -> bool {
        self.atts.iter().all(|a| schema.position_of(a).is_some())
    }

    /// Resolves each of this spec's columns to its position in `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] for the first column `schema` lacks.
    pub fn positions_in(&self, schema: &TupleSpec) -> Result<Vec<usize>> {
        self.atts
            .iter()
            .map(|att| {
                schema.position_of(att).ok_or_else(|| Error::UnknownColumn {
                    column: att.clone(),
                    schema: schema.to_string(),
                })
            })
            .collect()
    }

    /// Resolves exactly one column of this spec to its position in `schema`.
    ///
    /// # Errors
    ///
    /// Fails if this spec does not hold exactly one column, or if `schema`
    /// lacks it.
    pub fn single_position_in(&self, schema: &TupleSpec) -> Result<usize> {
        match self.atts.as_slice() {
            [att] => schema.position_of(att).ok_or_else(|| Error::UnknownColumn {
                column: att.clone(),
                schema: schema.to_string(),
            }),
            _ => Err(Error::execution(format!(
                "expected exactly one column in {self}, found {}",
                self.atts.len()
            ))),
        }
    }
}

impl fmt::Display for TupleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.set_name, self.atts.join(", "))
    }
}
