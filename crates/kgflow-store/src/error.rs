//! Store-local error types

use kgflow_core::QueryErrorKind;
use thiserror::Error;

/// A failed SPARQL parse or evaluation. Never a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self { kind: QueryErrorKind::Syntax, message: message.into() }
    }

    pub fn unbound(message: impl Into<String>) -> Self {
        Self { kind: QueryErrorKind::UnboundVariable, message: message.into() }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self { kind: QueryErrorKind::TypeMismatch, message: message.into() }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self { kind: QueryErrorKind::Unsupported, message: message.into() }
    }
}

impl From<QueryError> for kgflow_core::Error {
    fn from(e: QueryError) -> Self {
        kgflow_core::Error::query(e.kind, e.message)
    }
}

/// Malformed Turtle, with the position where parsing stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct TurtleError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl From<TurtleError> for kgflow_core::Error {
    fn from(e: TurtleError) -> Self {
        kgflow_core::Error::Parse(e.to_string())
    }
}
