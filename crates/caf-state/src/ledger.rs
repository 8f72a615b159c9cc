//! The `CalibrationLedger` trait.

use async_trait::async_trait;

use crate::error::StateResult;
use crate::records::{CalibrationMarker, CalibrationStatus, JobRecord, PayloadRecord};

/// Persistence boundary for calibration run bookkeeping.
///
/// Guarantees:
/// - `write_marker` replaces any existing marker for the same calibration
///   atomically; readers never observe a partially written marker.
/// - `record_payload` appends; `list_payloads` returns records in the
///   order they were recorded.
/// - `is_complete` is true iff a marker exists with `Completed` status.
#[async_trait]
pub trait CalibrationLedger: Send + Sync {
    /// Write (or replace) the marker for a calibration.
    async fn write_marker(&self, marker: &CalibrationMarker) -> StateResult<()>;

    /// Read a calibration's marker. `StateError::MarkerNotFound` if absent.
    async fn read_marker(&self, calibration: &str) -> StateResult<CalibrationMarker>;

    /// Append a committed payload record.
    async fn record_payload(&self, record: &PayloadRecord) -> StateResult<()>;

    /// All payload records for a calibration, in commit order.
    async fn list_payloads(&self, calibration: &str) -> StateResult<Vec<PayloadRecord>>;

    /// Record the terminal state of a collector job.
    async fn record_job(&self, record: &JobRecord) -> StateResult<()>;

    /// All job records for a calibration, in record order.
    async fn list_jobs(&self, calibration: &str) -> StateResult<Vec<JobRecord>>;

    /// Whether the calibration already completed in a previous run.
    async fn is_complete(&self, calibration: &str) -> StateResult<bool> {
        match self.read_marker(calibration).await {
            Ok(marker) => Ok(marker.status == CalibrationStatus::Completed),
            Err(crate::error::StateError::MarkerNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
