//! Record types persisted by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use caf_domain::{CommittedPayload, Iov, IovResult};

/// Lifecycle status of a calibration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalibrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// State of one collector job, as recorded on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Per-algorithm outcome stored inside the calibration marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmSummary {
    /// Algorithm name.
    pub name: String,

    /// IoVs for which a payload was committed, in execution order.
    pub committed: Vec<Iov>,

    /// Sub-ranges that failed to produce a payload.
    pub failures: Vec<IovResult>,

    /// Whether the strategy reached its Done state.
    pub done: bool,
}

/// The completion marker for one calibration.
///
/// Written atomically once the calibration reaches a terminal state; a
/// re-run with the same output directory reads these back to skip
/// already-completed calibrations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationMarker {
    pub name: String,
    pub status: CalibrationStatus,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub algorithms: Vec<AlgorithmSummary>,
}

impl CalibrationMarker {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CalibrationStatus::Running,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            algorithms: Vec::new(),
        }
    }

    pub fn finish(mut self, status: CalibrationStatus, algorithms: Vec<AlgorithmSummary>) -> Self {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.algorithms = algorithms;
        self
    }
}

/// A committed payload persisted to the output directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadRecord {
    pub calibration: String,
    pub algorithm: String,
    pub committed: CommittedPayload,
    pub recorded_at: DateTime<Utc>,
}

/// A collector job outcome persisted to the output directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub calibration: String,
    pub job_index: usize,
    pub state: JobState,
    pub output_file: Option<std::path::PathBuf>,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lifecycle() {
        let marker = CalibrationMarker::started("ecl_timing");
        assert_eq!(marker.status, CalibrationStatus::Running);
        assert!(marker.finished_at.is_none());

        let finished = marker.finish(CalibrationStatus::Completed, Vec::new());
        assert_eq!(finished.status, CalibrationStatus::Completed);
        assert!(finished.finished_at.is_some());
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Submitted.is_terminal());
    }

    #[test]
    fn test_marker_serde_round_trip() {
        let marker = CalibrationMarker::started("vxd_alignment")
            .finish(CalibrationStatus::Failed, Vec::new());
        let text = serde_json::to_string(&marker).unwrap();
        let back: CalibrationMarker = serde_json::from_str(&text).unwrap();
        assert_eq!(back, marker);
        assert!(text.contains("FAILED"));
    }
}
