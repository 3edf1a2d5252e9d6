//! Errors raised while extracting, validating and planning workflows.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow id {id} is ambiguous: {candidates:?}")]
    Ambiguous { id: String, candidates: Vec<String> },

    #[error("step {step_id} is missing required config: {}", missing.join(", "))]
    Config { step_id: String, missing: Vec<String> },

    #[error("step {0} is declared more than once")]
    DuplicateStep(String),

    #[error("step {step_id} has unknown type {type_iri}")]
    UnknownType { step_id: String, type_iri: String },

    #[error("step {step_id} depends on {dependency}, which is not part of the workflow")]
    DanglingDependency { step_id: String, dependency: String },

    #[error("step {step_id} depends on {dependency}, which runs in a later pipeline")]
    ForwardDependency { step_id: String, dependency: String },

    #[error("dependency cycle among steps: {}", remaining.join(", "))]
    Cycle { remaining: Vec<String> },

    #[error("malformed workflow: {0}")]
    Malformed(String),
}

impl WorkflowError {
    pub fn config(step_id: impl Into<String>, missing: Vec<String>) -> Self {
        Self::Config { step_id: step_id.into(), missing }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Name reported in validation reports and receipts.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Ambiguous { .. } => "AmbiguousId",
            Self::Config { .. } => "ConfigError",
            Self::DuplicateStep(_) => "DuplicateStepError",
            Self::UnknownType { .. } => "UnknownStepType",
            Self::DanglingDependency { .. } => "DanglingDependency",
            Self::ForwardDependency { .. } => "ForwardDependency",
            Self::Cycle { .. } => "CycleError",
            Self::Malformed(_) => "ParseError",
        }
    }

    /// Step ids the error is about.
    pub fn step_ids(&self) -> Vec<String> {
        match self {
            Self::Config { step_id, .. }
            | Self::UnknownType { step_id, .. }
            | Self::DanglingDependency { step_id, .. }
            | Self::ForwardDependency { step_id, .. } => vec![step_id.clone()],
            Self::DuplicateStep(id) => vec![id.clone()],
            Self::Cycle { remaining } => remaining.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<WorkflowError> for kgflow_core::Error {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(id) => kgflow_core::Error::NotFound(id),
            WorkflowError::Malformed(m) => kgflow_core::Error::Parse(m),
            other => kgflow_core::Error::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_core_taxonomy() {
        let e: kgflow_core::Error = WorkflowError::NotFound("ex:wf".into()).into();
        assert_eq!(e.exit_code(), 2);
        let e: kgflow_core::Error = WorkflowError::Cycle { remaining: vec!["a".into(), "b".into()] }.into();
        assert_eq!(e.kind_name(), "ValidationError");
        assert!(e.to_string().contains("a, b"));
    }
}
