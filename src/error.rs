use thiserror::Error;

use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;

pub use crate::checker::TypeError;

/// Evaluation-time failure: division by zero, type tag mismatches, missing
/// fields, bad call arity, oversized ranges, failed dynamic regex
/// compilation, or a fault escaping a host callable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any failure the convenience pipeline can produce.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
