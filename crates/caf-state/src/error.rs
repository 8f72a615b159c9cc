//! Error types for the state persistence layer

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing run bookkeeping
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem error with the path that triggered it
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No marker exists for the named calibration
    #[error("No marker recorded for calibration '{0}'")]
    MarkerNotFound(String),

    /// A record on disk did not match the expected shape
    #[error("Invalid record at {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;
