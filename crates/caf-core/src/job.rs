//! Collector jobs handed to a [`crate::backend::Backend`].

use std::path::PathBuf;

use caf_state::JobState;

/// One unit of collection work: a command run over a chunk of input files.
///
/// The orchestrator builds jobs, hands them to a backend via `submit`, and
/// then only observes them through [`JobTransition`]s and the backend's
/// state snapshot. It never touches a job's working directory while the
/// backend owns it.
#[derive(Debug, Clone)]
pub struct CollectorJob {
    pub calibration: String,
    pub index: usize,
    /// Executable plus fixed arguments.
    pub cmd: Vec<String>,
    pub input_files: Vec<PathBuf>,
    /// Created by the backend before launch; also where stdout is captured.
    pub working_dir: PathBuf,
    /// The file the command must produce for the job to count as Completed.
    pub output_file: PathBuf,
}

impl CollectorJob {
    /// Stable identifier, unique within one CAF run.
    pub fn id(&self) -> String {
        format!("{}_collector_{}", self.calibration, self.index)
    }

    /// Path of the JSON manifest listing this job's input files.
    pub fn input_manifest(&self) -> PathBuf {
        self.working_dir.join("input_files.json")
    }

    /// Path stdout/stderr of the collector process is captured to.
    pub fn stdout_path(&self) -> PathBuf {
        self.working_dir.join("stdout")
    }
}

/// A state change observed by polling the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub job_id: String,
    pub state: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_paths_live_under_working_dir() {
        let job = CollectorJob {
            calibration: "cdc_t0".to_string(),
            index: 3,
            cmd: vec!["collect".to_string()],
            input_files: vec![],
            working_dir: PathBuf::from("/tmp/caf/cdc_t0/jobs/3"),
            output_file: PathBuf::from("/tmp/caf/cdc_t0/jobs/3/collector_output.json"),
        };
        assert_eq!(job.id(), "cdc_t0_collector_3");
        assert_eq!(
            job.input_manifest(),
            PathBuf::from("/tmp/caf/cdc_t0/jobs/3/input_files.json")
        );
        assert_eq!(job.stdout_path(), PathBuf::from("/tmp/caf/cdc_t0/jobs/3/stdout"));
    }
}
