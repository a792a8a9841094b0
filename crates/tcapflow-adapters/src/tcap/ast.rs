//! Atomic computations: the nodes of a parsed TCAP program.

use std::fmt;

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tcapflow_common::types::TupleSpec;
use tcapflow_common::utils::error::{Error, Result};

/// The operator of an atomic computation, with its operator-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum AtomicOp {
    /// Reads a stored set.
    Scan {
        /// Database name.
        db: String,
        /// Set name.
        set: String,
    },
    /// Appends the result of a lambda.
    Apply {
        /// Lambda name within the owning computation.
        lambda: String,
    },
    /// Keeps rows whose boolean column is true.
    Filter,
    /// Appends the hash of the left join key.
    HashLeft {
        /// Comparison lambda supplying the hasher.
        lambda: String,
    },
    /// Appends the hash of the right join key.
    HashRight {
        /// Comparison lambda supplying the hasher.
        lambda: String,
    },
    /// Appends the hash of an aggregation key.
    HashOne,
    /// Joins two tuple sets on their hash columns.
    Join {
        /// Hash column of the right input.
        right_input: TupleSpec,
        /// Columns kept from the right input.
        right_projection: TupleSpec,
    },
    /// Expands a list column.
    Flatten,
    /// Groups `(key, value, hash)` rows.
    Aggregate,
    /// Writes to a stored set.
    Output {
        /// Database name.
        db: String,
        /// Set name.
        set: String,
    },
}

impl AtomicOp {
    /// Returns the atomic computation type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AtomicOp::Scan { .. } => "Scan",
            AtomicOp::Apply { .. } => "Apply",
            AtomicOp::Filter => "Filter",
            AtomicOp::HashLeft { .. } => "HashLeft",
            AtomicOp::HashRight { .. } => "HashRight",
            AtomicOp::HashOne => "HashOne",
            AtomicOp::Join { .. } => "JoinSets",
            AtomicOp::Flatten => "Flatten",
            AtomicOp::Aggregate => "Aggregate",
            AtomicOp::Output { .. } => "Output",
        }
    }

    /// Returns the TCAP keyword.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            AtomicOp::Scan { .. } => "SCAN",
            AtomicOp::Apply { .. } => "APPLY",
            AtomicOp::Filter => "FILTER",
            AtomicOp::HashLeft { .. } => "HASHLEFT",
            AtomicOp::HashRight { .. } => "HASHRIGHT",
            AtomicOp::HashOne => "HASHONE",
            AtomicOp::Join { .. } => "JOIN",
            AtomicOp::Flatten => "FLATTEN",
            AtomicOp::Aggregate => "AGGREGATE",
            AtomicOp::Output { .. } => "OUTPUT",
        }
    }

    /// Returns the lambda name, for operators that name one.
    #[must_use]
    pub fn lambda(&self) -> Option<&str> {
        match self {
            AtomicOp::Apply { lambda }
            | AtomicOp::HashLeft { lambda }
            | AtomicOp::HashRight { lambda } => Some(lambda),
            _ => None,
        }
    }
}

/// One TCAP statement: an operator producing one tuple set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicComputation {
    /// The produced tuple set.
    pub output: TupleSpec,
    /// Columns the operator reads (empty for SCAN).
    pub input: TupleSpec,
    /// Columns copied through to the output (empty where the operator has
    /// no projection).
    pub projection: TupleSpec,
    /// Name of the user computation this statement belongs to.
    pub computation_name: String,
    /// The operator.
    #[serde(flatten)]
    pub op: AtomicOp,
}

impl AtomicComputation {
    /// Name of the produced tuple set.
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.output.set_name()
    }

    /// Names of every tuple set this statement reads.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        let left = (!self.input.set_name().is_empty()).then(|| self.input.set_name());
        let right = match &self.op {
            AtomicOp::Join { right_input, .. } => Some(right_input.set_name()),
            _ => None,
        };
        left.into_iter().chain(right)
    }

    /// Returns true for statements that read no tuple set.
    #[must_use]
    pub fn is_scan(&self) -> bool {
        matches!(self.op, AtomicOp::Scan { .. })
    }
}

impl fmt::Display for AtomicComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {}(", self.output, self.op.keyword())?;
        match &self.op {
            AtomicOp::Scan { db, set } => {
                write!(f, "'{set}', '{db}', '{}'", self.computation_name)?;
            }
            AtomicOp::Apply { lambda }
            | AtomicOp::HashLeft { lambda }
            | AtomicOp::HashRight { lambda } => {
                write!(
                    f,
                    "{}, {}, '{}', '{lambda}'",
                    self.input, self.projection, self.computation_name
                )?;
            }
            AtomicOp::Filter | AtomicOp::HashOne | AtomicOp::Flatten => {
                write!(
                    f,
                    "{}, {}, '{}'",
                    self.input, self.projection, self.computation_name
                )?;
            }
            AtomicOp::Join {
                right_input,
                right_projection,
            } => {
                write!(
                    f,
                    "{}, {}, {right_input}, {right_projection}, '{}'",
                    self.input, self.projection, self.computation_name
                )?;
            }
            AtomicOp::Aggregate => {
                write!(f, "{}, '{}'", self.input, self.computation_name)?;
            }
            AtomicOp::Output { db, set } => {
                write!(
                    f,
                    "{}, '{set}', '{db}', '{}'",
                    self.input, self.computation_name
                )?;
            }
        }
        f.write_str(")")
    }
}

/// A validated TCAP program with producer and consumer indices.
///
/// Every tuple set has exactly one producer, and every statement only reads
/// tuple sets produced by an earlier statement.
#[derive(Debug, Clone, Default)]
pub struct AtomicComputationList {
    computations: Vec<AtomicComputation>,
    producers: IndexMap<String, usize>,
    consumers: HashMap<String, Vec<usize>>,
}

impl AtomicComputationList {
    /// Validates and indexes `computations`, in program order.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateTupleSet`] if two statements produce the same set
    /// - [`Error::UnresolvedTupleSet`] if a statement reads a set no earlier
    ///   statement produces
    /// - [`Error::UnknownColumn`] if it reads a column its producer lacks
    pub fn new(computations: Vec<AtomicComputation>) -> Result<Self> {
        let mut list = Self::default();
        for computation in computations {
            list.push(computation)?;
        }
        Ok(list)
    }

    fn resolve(&self, spec: &TupleSpec, consumer: &str) -> Result<usize> {
        let &index = self.producers.get(spec.set_name()).ok_or_else(|| {
            Error::UnresolvedTupleSet {
                tuple_set: spec.set_name().to_string(),
                consumer: consumer.to_string(),
            }
        })?;
        spec.positions_in(&self.computations[index].output)?;
        Ok(index)
    }

    fn push(&mut self, computation: AtomicComputation) -> Result<()> {
        let name = computation.output_name().to_string();
        if self.producers.contains_key(&name) {
            return Err(Error::DuplicateTupleSet(name));
        }

        if !computation.is_scan() {
            self.resolve(&computation.input, &name)?;
            if !computation.projection.set_name().is_empty() {
                self.resolve(&computation.projection, &name)?;
            }
        }
        if let AtomicOp::Join {
            right_input,
            right_projection,
        } = &computation.op
        {
            self.resolve(right_input, &name)?;
            self.resolve(right_projection, &name)?;
        }

        let index = self.computations.len();
        for input in computation.input_names() {
            let consumers = self.consumers.entry(input.to_string()).or_default();
            if !consumers.contains(&index) {
                consumers.push(index);
            }
        }
        self.producers.insert(name, index);
        self.computations.push(computation);
        Ok(())
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.computations.len()
    }

    /// Returns true if the program is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.computations.is_empty()
    }

    /// Statements in program order.
    pub fn iter(&self) -> impl Iterator<Item = &AtomicComputation> {
        self.computations.iter()
    }

    /// Statement at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AtomicComputation> {
        self.computations.get(index)
    }

    /// The statement producing `tuple_set`.
    #[must_use]
    pub fn producer(&self, tuple_set: &str) -> Option<&AtomicComputation> {
        self.producers
            .get(tuple_set)
            .map(|&index| &self.computations[index])
    }

    /// The statement producing `tuple_set`, failing if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedTupleSet`].
    pub fn require_producer(&self, tuple_set: &str) -> Result<&AtomicComputation> {
        self.producer(tuple_set)
            .ok_or_else(|| Error::UnresolvedTupleSet {
                tuple_set: tuple_set.to_string(),
                consumer: "a pipeline path".to_string(),
            })
    }

    /// Statements reading `tuple_set`, in program order.
    #[must_use]
    pub fn consumers(&self, tuple_set: &str) -> Vec<&AtomicComputation> {
        self.consumers
            .get(tuple_set)
            .map(|indices| indices.iter().map(|&i| &self.computations[i]).collect())
            .unwrap_or_default()
    }

    /// Produced tuple-set names, in program order.
    pub fn tuple_set_names(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// SCAN statements, in program order.
    pub fn scans(&self) -> impl Iterator<Item = &AtomicComputation> {
        self.computations.iter().filter(|c| c.is_scan())
    }

    /// OUTPUT statements, in program order.
    pub fn outputs(&self) -> impl Iterator<Item = &AtomicComputation> {
        self.computations
            .iter()
            .filter(|c| matches!(c.op, AtomicOp::Output { .. }))
    }

    /// Distinct computation names, in order of first appearance.
    #[must_use]
    pub fn computation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for c in &self.computations {
            if !names.contains(&c.computation_name.as_str()) {
                names.push(&c.computation_name);
            }
        }
        names
    }
}

impl fmt::Display for AtomicComputationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for computation in &self.computations {
            writeln!(f, "{computation}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a AtomicComputationList {
    type Item = &'a AtomicComputation;
    type IntoIter = std::slice::Iter<'a, AtomicComputation>;

    fn into_iter(self) -> Self::IntoIter {
        self.computations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(name: &str) -> AtomicComputation {
        AtomicComputation {
            output: TupleSpec::new(name, ["x"]),
            input: TupleSpec::empty(),
            projection: TupleSpec::empty(),
            computation_name: "ScanUserSet_0".into(),
            op: AtomicOp::Scan {
                db: "db".into(),
                set: name.to_lowercase(),
            },
        }
    }

    fn apply(out: &str, input: &str) -> AtomicComputation {
        AtomicComputation {
            output: TupleSpec::new(out, ["x", "y"]),
            input: TupleSpec::new(input, ["x"]),
            projection: TupleSpec::new(input, ["x"]),
            computation_name: "SelectionComp_1".into(),
            op: AtomicOp::Apply {
                lambda: "f".into(),
            },
        }
    }

    #[test]
    fn test_producers_and_consumers() {
        let list = AtomicComputationList::new(vec![scan("A"), apply("B", "A"), apply("C", "A")])
            .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.producer("B").unwrap().input.set_name(), "A");
        let consumers: Vec<&str> = list.consumers("A").iter().map(|c| c.output_name()).collect();
        assert_eq!(consumers, vec!["B", "C"]);
        assert!(list.consumers("C").is_empty());
        assert_eq!(list.tuple_set_names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let err = AtomicComputationList::new(vec![scan("A"), scan("A")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateTupleSet(name) if name == "A"));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = AtomicComputationList::new(vec![apply("B", "A"), scan("A")]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedTupleSet { tuple_set, consumer } if tuple_set == "A" && consumer == "B"
        ));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let mut bad = apply("B", "A");
        bad.input = TupleSpec::new("A", ["nope"]);
        let err = AtomicComputationList::new(vec![scan("A"), bad]).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));
    }

    #[test]
    fn test_display_is_tcap() {
        assert_eq!(
            apply("B", "A").to_string(),
            "B(x, y) <= APPLY(A(x), A(x), 'SelectionComp_1', 'f')"
        );
        assert_eq!(
            scan("A").to_string(),
            "A(x) <= SCAN('a', 'db', 'ScanUserSet_0')"
        );
    }
}
