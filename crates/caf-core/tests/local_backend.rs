//! LocalBackend tests against real child processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use caf_core::backend::{Backend, LocalBackend};
use caf_core::job::CollectorJob;
use caf_core::CafError;
use caf_state::JobState;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn job(root: &Path, index: usize, cmd: Vec<String>) -> CollectorJob {
    let working_dir = root.join("jobs").join(index.to_string());
    CollectorJob {
        calibration: "local_test".to_string(),
        index,
        cmd,
        input_files: vec![PathBuf::from("/data/r1.root")],
        output_file: working_dir.join("collector_output.json"),
        working_dir,
    }
}

#[tokio::test]
async fn test_pool_never_exceeds_max_processes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(2);
    for i in 0..5 {
        let job = job(dir.path(), i, sh("sleep 0.2 && echo '{}' > \"$CAF_OUTPUT_FILE\""));
        backend.submit(&job).await.unwrap();
    }

    let mut max_running = 0;
    loop {
        backend.poll().await.unwrap();
        let states = backend.states().await.unwrap();
        let running = states.values().filter(|s| **s == JobState::Running).count();
        max_running = max_running.max(running);
        if states.values().all(|s| s.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(max_running <= 2, "saw {max_running} concurrent processes");
    let states = backend.states().await.unwrap();
    assert_eq!(states.len(), 5);
    assert!(states.values().all(|s| *s == JobState::Completed));
}

#[tokio::test]
async fn test_submit_writes_input_manifest_and_captures_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(1);
    let job = job(dir.path(), 0, sh("echo collecting && echo '{}' > \"$CAF_OUTPUT_FILE\""));
    backend.submit(&job).await.unwrap();

    let manifest = std::fs::read_to_string(job.input_manifest()).unwrap();
    let files: Vec<PathBuf> = serde_json::from_str(&manifest).unwrap();
    assert_eq!(files, vec![PathBuf::from("/data/r1.root")]);

    backend
        .wait_all(Duration::from_secs(10), Duration::from_millis(20))
        .await
        .unwrap();
    let stdout = std::fs::read_to_string(job.stdout_path()).unwrap();
    assert!(stdout.contains("collecting"));
    assert!(job.output_file.exists());
}

#[tokio::test]
async fn test_nonzero_exit_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(1);
    let job = job(dir.path(), 0, sh("exit 1"));
    backend.submit(&job).await.unwrap();
    backend
        .wait_all(Duration::from_secs(10), Duration::from_millis(20))
        .await
        .unwrap();
    let states = backend.states().await.unwrap();
    assert_eq!(states[&job.id()], JobState::Failed);
}

#[tokio::test]
async fn test_missing_output_file_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(1);
    // Exits cleanly but never writes the output file.
    let job = job(dir.path(), 0, sh("true"));
    backend.submit(&job).await.unwrap();
    backend
        .wait_all(Duration::from_secs(10), Duration::from_millis(20))
        .await
        .unwrap();
    let states = backend.states().await.unwrap();
    assert_eq!(states[&job.id()], JobState::Failed);
}

#[tokio::test]
async fn test_timeout_cancels_outstanding_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(1);
    let job = job(dir.path(), 0, sh("sleep 30"));
    backend.submit(&job).await.unwrap();

    let err = backend
        .wait_all(Duration::from_millis(200), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, CafError::BackendTimeout { .. }));
    let states = backend.states().await.unwrap();
    assert_eq!(states[&job.id()], JobState::Failed);
}
