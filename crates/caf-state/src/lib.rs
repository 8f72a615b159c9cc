//! CAF State Persistence
//!
//! On-disk bookkeeping for calibration runs: completion markers, committed
//! payload records and collector job records, written so that a crashed run
//! can be resumed from the same output directory.
//!
//! The `CalibrationLedger` trait is the stable boundary; `FsLedger` is the
//! production filesystem implementation and `fakes::MemoryLedger` is the
//! in-memory test double.

pub mod error;
pub mod fakes;
pub mod fs_ledger;
pub mod ledger;
pub mod records;

pub use error::{StateError, StateResult};
pub use fs_ledger::FsLedger;
pub use ledger::CalibrationLedger;
pub use records::{
    AlgorithmSummary, CalibrationMarker, CalibrationStatus, JobRecord, JobState, PayloadRecord,
};

/// CAF state layer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
