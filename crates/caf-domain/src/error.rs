//! Error types for domain operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid IoV: low bound ({exp_low},{run_low}) above high bound ({exp_high},{run_high})")]
    InvalidIov {
        exp_low: u32,
        run_low: u32,
        exp_high: i64,
        run_high: i64,
    },

    #[error("Cannot build an IoV from an empty run list")]
    EmptyRunList,

    #[error("IoVs {0} and {1} are not contiguous and cannot be joined")]
    NonContiguousUnion(String, String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;
