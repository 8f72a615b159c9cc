//! Contract tests run against both ledger implementations.

use std::sync::Arc;

use caf_domain::{CommittedPayload, Iov, Payload};
use caf_state::fakes::MemoryLedger;
use caf_state::{
    AlgorithmSummary, CalibrationLedger, CalibrationMarker, CalibrationStatus, FsLedger, JobRecord,
    JobState, PayloadRecord,
};
use chrono::Utc;
use serde_json::json;

fn payload_record(calibration: &str, index: u32) -> PayloadRecord {
    PayloadRecord {
        calibration: calibration.to_string(),
        algorithm: "TestAlgo".to_string(),
        committed: CommittedPayload {
            iov: Iov::new(0, index, 0, i64::from(index)).unwrap(),
            payload: Payload::new("constants", json!({ "index": index })),
        },
        recorded_at: Utc::now(),
    }
}

async fn check_ledger_contract(ledger: Arc<dyn CalibrationLedger>) {
    // Unknown calibration: empty lists, not complete.
    assert!(!ledger.is_complete("unknown").await.unwrap());
    assert!(ledger.list_payloads("unknown").await.unwrap().is_empty());
    assert!(ledger.list_jobs("unknown").await.unwrap().is_empty());

    // Marker replace semantics.
    let marker = CalibrationMarker::started("cal_a");
    ledger.write_marker(&marker).await.unwrap();
    assert!(!ledger.is_complete("cal_a").await.unwrap());

    let summary = AlgorithmSummary {
        name: "TestAlgo".to_string(),
        committed: vec![Iov::new(0, 0, 0, 5).unwrap()],
        failures: Vec::new(),
        done: true,
    };
    let finished = marker.finish(CalibrationStatus::Completed, vec![summary]);
    ledger.write_marker(&finished).await.unwrap();
    assert!(ledger.is_complete("cal_a").await.unwrap());
    let back = ledger.read_marker("cal_a").await.unwrap();
    assert_eq!(back.algorithms.len(), 1);
    assert!(back.algorithms[0].done);

    // Payload append order is preserved.
    for i in 0..3 {
        ledger.record_payload(&payload_record("cal_a", i)).await.unwrap();
    }
    let payloads = ledger.list_payloads("cal_a").await.unwrap();
    assert_eq!(payloads.len(), 3);
    for (i, record) in payloads.iter().enumerate() {
        assert_eq!(record.committed.iov.run_low, i as u32);
    }

    // Job records accumulate.
    for i in 0..2 {
        ledger
            .record_job(&JobRecord {
                calibration: "cal_a".to_string(),
                job_index: i,
                state: if i == 0 { JobState::Completed } else { JobState::Failed },
                output_file: None,
                exit_code: Some(i as i32),
            })
            .await
            .unwrap();
    }
    let jobs = ledger.list_jobs("cal_a").await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].state, JobState::Completed);
    assert_eq!(jobs[1].state, JobState::Failed);

    // Other calibrations remain isolated.
    assert!(ledger.list_payloads("cal_b").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_ledger_contract() {
    check_ledger_contract(Arc::new(MemoryLedger::new())).await;
}

#[tokio::test]
async fn test_fs_ledger_contract() {
    let dir = tempfile::tempdir().unwrap();
    check_ledger_contract(Arc::new(FsLedger::new(dir.path()))).await;
}

#[tokio::test]
async fn test_fs_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = FsLedger::new(dir.path());
        let marker =
            CalibrationMarker::started("cal_resume").finish(CalibrationStatus::Completed, Vec::new());
        ledger.write_marker(&marker).await.unwrap();
        ledger.record_payload(&payload_record("cal_resume", 0)).await.unwrap();
    }
    // A fresh ledger over the same directory sees the completed state.
    let reopened = FsLedger::new(dir.path());
    assert!(reopened.is_complete("cal_resume").await.unwrap());
    assert_eq!(reopened.list_payloads("cal_resume").await.unwrap().len(), 1);
}
