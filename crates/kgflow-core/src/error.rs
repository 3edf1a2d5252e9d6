//! Error types for kgflow

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-kinds of a failed SPARQL evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryErrorKind {
    Syntax,
    UnboundVariable,
    TypeMismatch,
    Unsupported,
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::UnboundVariable => "unbound variable",
            Self::TypeMismatch => "type mismatch",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Which handler (or runtime concern) produced a step failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepErrorKind {
    Sparql,
    Template,
    File,
    Http,
    Cli,
    Output,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sparql => "sparql",
            Self::Template => "template",
            Self::File => "file",
            Self::Http => "http",
            Self::Cli => "cli",
            Self::Output => "output",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("query error ({kind}): {message}")]
    Query {
        kind: QueryErrorKind,
        message: String,
    },

    #[error("step error: {step_id} [{kind}] {message}")]
    Step {
        step_id: String,
        kind: StepErrorKind,
        message: String,
    },

    #[error("lock error: {name} - {message}")]
    Lock { name: String, message: String },

    #[error("durable io error: {0}")]
    DurableIo(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self::Query {
            kind,
            message: message.into(),
        }
    }

    pub fn step(step_id: impl Into<String>, kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self::Step {
            step_id: step_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn lock(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lock {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn durable(message: impl Into<String>) -> Self {
        Self::DurableIo(message.into())
    }

    /// Stable taxonomy name recorded in receipts.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Parse(_) => "ParseError",
            Self::Validation(_) => "ValidationError",
            Self::Query { .. } => "QueryError",
            Self::Step { .. } => "StepError",
            Self::Lock { .. } => "LockError",
            Self::DurableIo(_) => "DurableIoError",
            Self::Cancelled(_) => "CancelledError",
            Self::Timeout(_) => "TimeoutError",
            Self::NotFound(_) => "NotFound",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }

    /// Process exit code when the engine is driven from a shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => ExitCode::NotFound.code(),
            Self::Parse(_) | Self::Validation(_) | Self::Config(_) => ExitCode::Validation.code(),
            Self::Cancelled(_) => ExitCode::Cancelled.code(),
            Self::Timeout(_) => ExitCode::Timeout.code(),
            _ => ExitCode::Failed.code(),
        }
    }
}

/// Shell-facing exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failed = 1,
    NotFound = 2,
    Validation = 3,
    Cancelled = 4,
    Timeout = 5,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(Error::NotFound("wf".into()).exit_code(), 2);
        assert_eq!(Error::Validation("cycle".into()).exit_code(), 3);
        assert_eq!(Error::Cancelled("x".into()).exit_code(), 4);
        assert_eq!(Error::Timeout("x".into()).exit_code(), 5);
        assert_eq!(Error::durable("disk full").exit_code(), 1);
    }

    #[test]
    fn step_error_display() {
        let e = Error::step("ex:a", StepErrorKind::Http, "status 500");
        assert_eq!(e.to_string(), "step error: ex:a [http] status 500");
        assert_eq!(e.kind_name(), "StepError");
    }
}
