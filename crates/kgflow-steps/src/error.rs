//! Handler errors.

use kgflow_core::StepErrorKind;
use kgflow_workflow::StepKind;
use serde_json::Value;
use thiserror::Error;

/// A failed handler call. `data` carries whatever the handler produced
/// before failing (a non-2xx response, a failed command's output).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{kind}] {message}")]
pub struct HandlerError {
    pub kind: StepErrorKind,
    pub message: String,
    pub data: Option<Value>,
}

impl HandlerError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), data: None }
    }

    pub fn sparql(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Sparql, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Template, message)
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::File, message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Http, message)
    }

    pub fn cli(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Cli, message)
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Output, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(StepErrorKind::Cancelled, "step cancelled")
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == StepErrorKind::Cancelled
    }

    pub fn into_core(self, step_id: impl Into<String>) -> kgflow_core::Error {
        match self.kind {
            StepErrorKind::Cancelled => kgflow_core::Error::Cancelled(self.message),
            kind => kgflow_core::Error::step(step_id, kind, self.message),
        }
    }
}

/// Error kind reported for failures of a given step type.
pub fn kind_for(kind: StepKind) -> StepErrorKind {
    match kind {
        StepKind::Sparql => StepErrorKind::Sparql,
        StepKind::Template => StepErrorKind::Template,
        StepKind::File => StepErrorKind::File,
        StepKind::Http => StepErrorKind::Http,
        StepKind::Cli => StepErrorKind::Cli,
        StepKind::Output => StepErrorKind::Output,
    }
}

impl From<crate::template::RenderError> for HandlerError {
    fn from(err: crate::template::RenderError) -> Self {
        Self::template(err.to_string())
    }
}
