//! CAF Domain Model
//!
//! Pure value types shared by the calibration engine:
//! - `ExpRun`: an (experiment, run) pair, the basic unit of data-taking
//! - `Iov`: an interval of validity over (experiment, run) pairs
//! - `RunRange`: an ordered, deduplicated set of runs
//! - `ResultCode`: what an algorithm execution returned
//! - `Payload`: a calibration object committed for a specific IoV
//!
//! No I/O and no async here; everything is plain data with set algebra.

pub mod error;
pub mod exp_run;
pub mod iov;
pub mod payload;
pub mod result;
pub mod run_range;

pub use error::{DomainError, Result};
pub use exp_run::ExpRun;
pub use iov::Iov;
pub use payload::{CommittedPayload, Payload};
pub use result::{IovResult, ResultCode};
pub use run_range::RunRange;

/// CAF domain version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
