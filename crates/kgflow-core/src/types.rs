//! Shared identifiers and status types

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Execution identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExecutionId(Arc<str>);

impl ExecutionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// A fresh random execution id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for ExecutionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ExecutionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// Terminal status of a workflow execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Status of an execution that ended with `err`.
    pub fn from_error(err: &crate::Error) -> Self {
        match err {
            crate::Error::Cancelled(_) => Self::Cancelled,
            crate::Error::Timeout(_) => Self::Timeout,
            _ => Self::Failed,
        }
    }

    pub fn exit_code(self) -> i32 {
        use crate::error::ExitCode;
        match self {
            Self::Success => ExitCode::Success.code(),
            Self::Failed => ExitCode::Failed.code(),
            Self::Cancelled => ExitCode::Cancelled.code(),
            Self::Timeout => ExitCode::Timeout.code(),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why an execution failed: taxonomy kind, offending step, message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl FailureInfo {
    pub fn from_error(err: &crate::Error) -> Self {
        let step_id = match err {
            crate::Error::Step { step_id, .. } => Some(step_id.clone()),
            _ => None,
        };
        Self {
            kind: err.kind_name().to_string(),
            step_id,
            message: err.to_string(),
        }
    }
}
