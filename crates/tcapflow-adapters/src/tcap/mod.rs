//! The TCAP intermediate language.
//!
//! A TCAP program is a list of statements, one per atomic computation:
//!
//! ```text
//! outName(col, ...) <= OP(inName(cols), [inName(cols), ...] 'ComputationName' [, 'lambda'])
//! ```
//!
//! Parsing yields an [`AtomicComputationList`], which indexes every tuple
//! set by its single producer and by its consumers.
//!
//! # Example
//!
//! ```
//! use tcapflow_adapters::tcap::parse_tcap;
//!
//! let program = parse_tcap(
//!     "A(a) <= SCAN('input', 'db', 'ScanUserSet_0')
//!      OUT() <= OUTPUT(A(a), 'output', 'db', 'Output_1')",
//! )
//! .unwrap();
//! assert_eq!(program.len(), 2);
//! assert_eq!(program.consumers("A")[0].output_name(), "OUT");
//! ```

mod ast;
mod lexer;
mod parser;

pub use ast::{AtomicComputation, AtomicComputationList, AtomicOp};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{Parser, parse_tcap};
