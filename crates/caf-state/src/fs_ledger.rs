//! Filesystem-backed ledger.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::ledger::CalibrationLedger;
use crate::records::{CalibrationMarker, JobRecord, PayloadRecord};

/// Ledger rooted at the CAF output directory.
///
/// Layout, one subdirectory per calibration:
///
/// ```text
/// <output_dir>/<calibration>/marker.json
/// <output_dir>/<calibration>/payloads/0000.json
/// <output_dir>/<calibration>/jobs.json
/// ```
///
/// Each calibration writes only its own subdirectory, so no locking is
/// needed across calibrations. The marker write goes through a temp file
/// followed by a rename so a crash mid-write can never be mistaken for a
/// completed calibration.
#[derive(Debug, Clone)]
pub struct FsLedger {
    root: PathBuf,
}

impl FsLedger {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: output_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn calibration_dir(&self, calibration: &str) -> PathBuf {
        self.root.join(calibration)
    }

    fn marker_path(&self, calibration: &str) -> PathBuf {
        self.calibration_dir(calibration).join("marker.json")
    }

    fn payloads_dir(&self, calibration: &str) -> PathBuf {
        self.calibration_dir(calibration).join("payloads")
    }

    fn jobs_path(&self, calibration: &str) -> PathBuf {
        self.calibration_dir(calibration).join("jobs.json")
    }

    async fn ensure_dir(path: &Path) -> StateResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StateError::io(path, e))
    }

    /// Write `content` to `path` atomically (temp file + rename).
    async fn write_atomic(path: &Path, content: &[u8]) -> StateResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StateError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StateError::io(path, e))
    }
}

#[async_trait]
impl CalibrationLedger for FsLedger {
    async fn write_marker(&self, marker: &CalibrationMarker) -> StateResult<()> {
        let dir = self.calibration_dir(&marker.name);
        Self::ensure_dir(&dir).await?;
        let content = serde_json::to_vec_pretty(marker)?;
        let path = self.marker_path(&marker.name);
        Self::write_atomic(&path, &content).await?;
        debug!(calibration = %marker.name, status = ?marker.status, "Wrote marker");
        Ok(())
    }

    async fn read_marker(&self, calibration: &str) -> StateResult<CalibrationMarker> {
        let path = self.marker_path(calibration);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::MarkerNotFound(calibration.to_string()))
            }
            Err(e) => return Err(StateError::io(&path, e)),
        };
        let marker: CalibrationMarker =
            serde_json::from_slice(&content).map_err(|e| StateError::InvalidRecord {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(marker)
    }

    async fn record_payload(&self, record: &PayloadRecord) -> StateResult<()> {
        let dir = self.payloads_dir(&record.calibration);
        Self::ensure_dir(&dir).await?;
        let index = self.list_payloads(&record.calibration).await?.len();
        let path = dir.join(format!("{index:04}.json"));
        let content = serde_json::to_vec_pretty(record)?;
        Self::write_atomic(&path, &content).await?;
        debug!(
            calibration = %record.calibration,
            algorithm = %record.algorithm,
            iov = %record.committed.iov,
            "Recorded payload"
        );
        Ok(())
    }

    async fn list_payloads(&self, calibration: &str) -> StateResult<Vec<PayloadRecord>> {
        let dir = self.payloads_dir(calibration);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&dir, e)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        // Commit order is the zero-padded file index.
        paths.sort();
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| StateError::io(&path, e))?;
            let record: PayloadRecord =
                serde_json::from_slice(&content).map_err(|e| StateError::InvalidRecord {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn record_job(&self, record: &JobRecord) -> StateResult<()> {
        let dir = self.calibration_dir(&record.calibration);
        Self::ensure_dir(&dir).await?;
        let mut jobs = self.list_jobs(&record.calibration).await?;
        jobs.push(record.clone());
        let content = serde_json::to_vec_pretty(&jobs)?;
        Self::write_atomic(&self.jobs_path(&record.calibration), &content).await
    }

    async fn list_jobs(&self, calibration: &str) -> StateResult<Vec<JobRecord>> {
        let path = self.jobs_path(calibration);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        let records: Vec<JobRecord> =
            serde_json::from_slice(&content).map_err(|e| StateError::InvalidRecord {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(records)
    }
}
