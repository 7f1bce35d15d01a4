//! Snippet language front end
//!
//! Lexer, parser, syntax tree and visitor for the Python-syntax subset the
//! engine executes. Shared by the static validator (which only walks the
//! tree) and the interpreter.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod visit;

pub use parser::{parse_expression, parse_module};

use thiserror::Error;

/// Parse failure, located at the offending token.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    /// 1-based line
    pub line: u32,
    /// 0-based character column
    pub column: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line: line.max(1),
            column,
        }
    }
}
