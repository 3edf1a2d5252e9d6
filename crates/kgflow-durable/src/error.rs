//! Durable I/O errors.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DurableError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock {name}: {message}")]
    Lock { name: String, message: String },

    #[error("corrupt record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("receipt chain broken at {sequence}: {message}")]
    Chain { sequence: u64, message: String },

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DurableError>;

impl DurableError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn corrupt(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Corrupt { path: path.as_ref().to_path_buf(), message: message.into() }
    }

    pub fn lock(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lock { name: name.into(), message: message.into() }
    }
}

impl From<DurableError> for kgflow_core::Error {
    fn from(err: DurableError) -> Self {
        match err {
            DurableError::Lock { name, message } => kgflow_core::Error::lock(name, message),
            other => kgflow_core::Error::durable(other.to_string()),
        }
    }
}

/// Attach the path to an io error.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| DurableError::io(path, e))
    }
}
