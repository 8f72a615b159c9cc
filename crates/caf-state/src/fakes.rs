//! In-memory fakes for the ledger trait (testing only)
//!
//! `MemoryLedger` satisfies the `CalibrationLedger` contract without
//! touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StateError, StateResult};
use crate::ledger::CalibrationLedger;
use crate::records::{CalibrationMarker, JobRecord, PayloadRecord};

#[derive(Debug, Default)]
struct LedgerState {
    markers: HashMap<String, CalibrationMarker>,
    payloads: HashMap<String, Vec<PayloadRecord>>,
    jobs: HashMap<String, Vec<JobRecord>>,
}

/// In-memory ledger backed by `Mutex<HashMap>`s.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalibrationLedger for MemoryLedger {
    async fn write_marker(&self, marker: &CalibrationMarker) -> StateResult<()> {
        let mut state = self.state.lock().unwrap();
        state.markers.insert(marker.name.clone(), marker.clone());
        Ok(())
    }

    async fn read_marker(&self, calibration: &str) -> StateResult<CalibrationMarker> {
        let state = self.state.lock().unwrap();
        state
            .markers
            .get(calibration)
            .cloned()
            .ok_or_else(|| StateError::MarkerNotFound(calibration.to_string()))
    }

    async fn record_payload(&self, record: &PayloadRecord) -> StateResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .payloads
            .entry(record.calibration.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_payloads(&self, calibration: &str) -> StateResult<Vec<PayloadRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.payloads.get(calibration).cloned().unwrap_or_default())
    }

    async fn record_job(&self, record: &JobRecord) -> StateResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .jobs
            .entry(record.calibration.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_jobs(&self, calibration: &str) -> StateResult<Vec<JobRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.get(calibration).cloned().unwrap_or_default())
    }
}
