//! Hook errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook {hook}: malformed predicate: {message}")]
    MalformedPredicate { hook: String, message: String },

    #[error("hook {hook}: query failed: {source}")]
    Query {
        hook: String,
        #[source]
        source: kgflow_store::QueryError,
    },

    #[error("unknown hook {0}")]
    UnknownHook(String),

    #[error(transparent)]
    Durable(#[from] kgflow_durable::DurableError),
}

impl HookError {
    pub fn malformed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPredicate { hook: hook.into(), message: message.into() }
    }
}

impl From<HookError> for kgflow_core::Error {
    fn from(err: HookError) -> Self {
        match err {
            HookError::MalformedPredicate { .. } => kgflow_core::Error::Validation(err.to_string()),
            HookError::Query { source, .. } => source.into(),
            HookError::UnknownHook(id) => kgflow_core::Error::NotFound(id),
            HookError::Durable(e) => e.into(),
        }
    }
}
