//! Error taxonomy for the calibration engine.

use std::path::PathBuf;
use std::time::Duration;

use caf_domain::{DomainError, Iov, ResultCode};
use caf_state::StateError;
use thiserror::Error;

/// Errors surfaced by strategies, backends and the orchestrator.
#[derive(Debug, Error)]
pub enum CafError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("backend did not reach a terminal state within {waited:?}")]
    BackendTimeout { waited: Duration },

    #[error("collector job {job_id} failed: {reason}")]
    CollectorJobFailure { job_id: String, reason: String },

    #[error("algorithm {algorithm} exceeded {limit} iterations over {iov}")]
    MaxIterationsExceeded {
        algorithm: String,
        limit: u32,
        iov: Iov,
    },

    #[error("algorithm {algorithm} returned unexpected result {code}")]
    UnexpectedResult {
        algorithm: String,
        code: ResultCode,
    },

    #[error("algorithm {algorithm} commit failed: {reason}")]
    CommitFailed { algorithm: String, reason: String },

    #[error("dependency cycle involving calibration {0}")]
    DependencyCycle(String),

    #[error("calibration {0} already added")]
    DuplicateCalibration(String),

    #[error("calibration {name} is invalid: {reason}")]
    InvalidCalibration { name: String, reason: String },

    #[error("strategy {strategy} misconfigured: {reason}")]
    StrategyConfig {
        strategy: &'static str,
        reason: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CafError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CafResult<T> = Result<T, CafError>;
