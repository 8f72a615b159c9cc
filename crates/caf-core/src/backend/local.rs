//! Local multiprocessing backend.
//!
//! Runs collector commands as child processes on the local machine,
//! holding at most `max_processes` alive at once; excess submissions wait
//! in a FIFO queue and are launched as slots free up during polls.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use caf_state::JobState;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::errors::{CafError, CafResult};
use crate::job::{CollectorJob, JobTransition};

/// Everything needed to launch a job, captured at submit time.
#[derive(Debug)]
struct PreparedJob {
    id: String,
    cmd: Vec<String>,
    working_dir: PathBuf,
    output_file: PathBuf,
    stdout_path: PathBuf,
    manifest_path: PathBuf,
}

struct RunningJob {
    id: String,
    child: Child,
    output_file: PathBuf,
}

#[derive(Default)]
struct LocalState {
    queued: VecDeque<PreparedJob>,
    running: Vec<RunningJob>,
    states: HashMap<String, JobState>,
    transitions: Vec<JobTransition>,
}

impl LocalState {
    fn record(&mut self, id: &str, state: JobState) {
        self.states.insert(id.to_string(), state);
        self.transitions.push(JobTransition {
            job_id: id.to_string(),
            state,
        });
    }
}

/// Bounded process pool over `tokio::process`.
pub struct LocalBackend {
    max_processes: usize,
    // Never held across an await; all filesystem setup happens before the
    // lock is taken.
    inner: Mutex<LocalState>,
}

impl LocalBackend {
    pub fn new(max_processes: usize) -> Self {
        Self {
            max_processes: max_processes.max(1),
            inner: Mutex::new(LocalState::default()),
        }
    }

    fn spawn_child(prepared: &PreparedJob) -> std::io::Result<Child> {
        let stdout = std::fs::File::create(&prepared.stdout_path)?;
        let stderr = stdout.try_clone()?;
        let mut command = Command::new(&prepared.cmd[0]);
        command
            .args(&prepared.cmd[1..])
            .current_dir(&prepared.working_dir)
            .env("CAF_INPUT_MANIFEST", &prepared.manifest_path)
            .env("CAF_OUTPUT_FILE", &prepared.output_file)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        command.spawn()
    }

    fn launch(state: &mut LocalState, prepared: PreparedJob) {
        match Self::spawn_child(&prepared) {
            Ok(child) => {
                debug!(job = %prepared.id, "Launched collector process");
                state.record(&prepared.id, JobState::Running);
                state.running.push(RunningJob {
                    id: prepared.id,
                    child,
                    output_file: prepared.output_file,
                });
            }
            Err(e) => {
                warn!(job = %prepared.id, error = %e, "Failed to spawn collector process");
                state.record(&prepared.id, JobState::Failed);
            }
        }
    }

    /// Fill free slots from the queue. Caller holds the lock.
    fn backfill(state: &mut LocalState, max_processes: usize) {
        while state.running.len() < max_processes {
            match state.queued.pop_front() {
                Some(prepared) => Self::launch(state, prepared),
                None => break,
            }
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn submit(&self, job: &CollectorJob) -> CafResult<()> {
        if job.cmd.is_empty() {
            return Err(CafError::CollectorJobFailure {
                job_id: job.id(),
                reason: "empty collector command".to_string(),
            });
        }
        tokio::fs::create_dir_all(&job.working_dir)
            .await
            .map_err(|e| CafError::io(&job.working_dir, e))?;
        if let Some(parent) = job.output_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CafError::io(parent, e))?;
        }
        let manifest = job.input_manifest();
        let content = serde_json::to_vec_pretty(&job.input_files)?;
        tokio::fs::write(&manifest, content)
            .await
            .map_err(|e| CafError::io(&manifest, e))?;

        let prepared = PreparedJob {
            id: job.id(),
            cmd: job.cmd.clone(),
            working_dir: job.working_dir.clone(),
            output_file: job.output_file.clone(),
            stdout_path: job.stdout_path(),
            manifest_path: manifest,
        };

        let mut state = self.inner.lock().unwrap();
        state.record(&prepared.id, JobState::Submitted);
        if state.running.len() < self.max_processes {
            Self::launch(&mut state, prepared);
        } else {
            debug!(job = %prepared.id, "Queued collector process (pool full)");
            state.queued.push_back(prepared);
        }
        Ok(())
    }

    async fn poll(&self) -> CafResult<Vec<JobTransition>> {
        let mut state = self.inner.lock().unwrap();
        let running = std::mem::take(&mut state.running);
        for mut job in running {
            match job.child.try_wait() {
                Ok(Some(status)) => {
                    let next = if status.success() && job.output_file.exists() {
                        JobState::Completed
                    } else {
                        if status.success() {
                            warn!(job = %job.id, "Collector exited cleanly but produced no output file");
                        }
                        JobState::Failed
                    };
                    state.record(&job.id, next);
                }
                Ok(None) => state.running.push(job),
                Err(e) => {
                    warn!(job = %job.id, error = %e, "Failed to reap collector process");
                    state.record(&job.id, JobState::Failed);
                }
            }
        }
        Self::backfill(&mut state, self.max_processes);
        Ok(std::mem::take(&mut state.transitions))
    }

    async fn states(&self) -> CafResult<HashMap<String, JobState>> {
        Ok(self.inner.lock().unwrap().states.clone())
    }

    async fn cancel_all(&self) -> CafResult<()> {
        let mut state = self.inner.lock().unwrap();
        for mut job in std::mem::take(&mut state.running) {
            job.child.start_kill().ok();
            state.record(&job.id, JobState::Failed);
        }
        for prepared in std::mem::take(&mut state.queued) {
            state.record(&prepared.id, JobState::Failed);
        }
        Ok(())
    }
}
