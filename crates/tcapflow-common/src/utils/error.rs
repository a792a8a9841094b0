//! Error types for Tcapflow.
//!
//! Every crate in the workspace reports failures through [`Error`]. Most
//! variants are structural (a malformed program, a dangling tuple-set
//! reference) and are surfaced to the job-stage boundary untouched. The one
//! recoverable condition is [`Error::NotEnoughSpace`]: page-bounded writers
//! catch it, flush what they have, and retry on a fresh page.

use std::fmt;

use thiserror::Error;

/// Result type alias for Tcapflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Tcapflow.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed TCAP text.
    #[error("{0}")]
    Parse(ParseError),

    /// An atomic computation reads a tuple set (or column) nobody produced.
    #[error("unresolved tuple set '{tuple_set}' referenced by {consumer}")]
    UnresolvedTupleSet {
        /// The tuple-set name that could not be resolved.
        tuple_set: String,
        /// Description of the consumer holding the dangling reference.
        consumer: String,
    },

    /// Two atomic computations declare the same output tuple set.
    #[error("tuple set '{0}' has more than one producer")]
    DuplicateTupleSet(String),

    /// A column is not part of the schema it was looked up in.
    #[error("column '{column}' not found in {schema}")]
    UnknownColumn {
        /// The missing column.
        column: String,
        /// The schema that was searched.
        schema: String,
    },

    /// A join consumer matches neither of its inputs.
    #[error("cannot tell which side of join '{computation}' consumes '{tuple_set}'")]
    AmbiguousJoinSide {
        /// The join computation.
        computation: String,
        /// The tuple set being pipelined into it.
        tuple_set: String,
    },

    /// No consumer of the given tuple set belongs to the target computation.
    #[error("no sink for tuple set '{tuple_set}' in computation '{computation}'")]
    NoSinkFound {
        /// The last tuple set of the pipeline.
        tuple_set: String,
        /// The computation expected to consume it.
        computation: String,
    },

    /// The first tuple set of a pipeline cannot act as a source.
    #[error("tuple set '{0}' is not produced by a source computation")]
    NoSourceFound(String),

    /// A computation name has no registered computation object.
    #[error("unknown computation '{0}'")]
    UnknownComputation(String),

    /// A lambda name is not exposed by its computation.
    #[error("computation '{computation}' has no lambda '{lambda}'")]
    UnknownLambda {
        /// The owning computation.
        computation: String,
        /// The missing lambda.
        lambda: String,
    },

    /// A hash set with this name is already registered.
    #[error("hash set '{0}' is already registered")]
    HashSetNameConflict(String),

    /// A hash set with this name is not registered.
    #[error("hash set '{0}' not found")]
    HashSetNotFound(String),

    /// The memory budget cannot satisfy a reservation.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available in the budget.
        available: usize,
    },

    /// The current allocation block is full. Recoverable by rotating pages.
    #[error("not enough space: requested {requested} bytes, {remaining} remaining")]
    NotEnoughSpace {
        /// Bytes requested.
        requested: usize,
        /// Bytes left in the block.
        remaining: usize,
    },

    /// A shared resource is held by another job stage.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,

    /// A worker thread panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A value had the wrong type for the operation.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type name.
        expected: String,
        /// Found type name.
        found: String,
    },

    /// The requested shape of computation is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A page failed its integrity check.
    #[error("corrupted page: {0}")]
    Corrupted(String),

    /// Runtime failure inside a stage or sink.
    #[error("execution error: {0}")]
    Execution(String),

    /// Invariant violated inside Tcapflow itself.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the caller may recover by flushing and retrying.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotEnoughSpace { .. })
    }

    /// Shorthand for [`Error::Execution`].
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution(message.into())
    }

    /// Shorthand for [`Error::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// A syntax or structure error in TCAP text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line of the offending token.
    pub line: usize,
    /// 1-based column of the offending token.
    pub column: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    /// Creates a new parse error.
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
