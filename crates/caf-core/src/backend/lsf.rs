//! LSF batch backend.
//!
//! Submits each collector job through `bsub` with a generated submission
//! script and tracks it by polling `bjobs`. Requires the LSF client tools
//! on `PATH`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use caf_state::JobState;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::errors::{CafError, CafResult};
use crate::job::{CollectorJob, JobTransition};

struct LsfJob {
    batch_id: String,
    state: JobState,
    output_file: PathBuf,
}

#[derive(Default)]
struct LsfState {
    jobs: HashMap<String, LsfJob>,
    transitions: Vec<JobTransition>,
}

pub struct LsfBackend {
    queue: String,
    inner: Mutex<LsfState>,
}

impl LsfBackend {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            inner: Mutex::new(LsfState::default()),
        }
    }

    fn submit_script(&self, job: &CollectorJob) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("#BSUB -q {}\n", self.queue));
        script.push_str(&format!("#BSUB -J {}\n", job.id()));
        script.push_str(&format!("#BSUB -o {}\n", job.stdout_path().display()));
        script.push_str(&format!("#BSUB -e {}\n", job.stdout_path().display()));
        script.push_str(&format!("cd {}\n", job.working_dir.display()));
        script.push_str(&format!(
            "export CAF_INPUT_MANIFEST={}\n",
            job.input_manifest().display()
        ));
        script.push_str(&format!(
            "export CAF_OUTPUT_FILE={}\n",
            job.output_file.display()
        ));
        script.push_str("exec ");
        script.push_str(&job.cmd.join(" "));
        script.push('\n');
        script
    }
}

/// Extract the batch job id from bsub's acknowledgement line,
/// `Job <12345> is submitted to queue <s>.`
fn parse_bsub_job_id(stdout: &str) -> Option<String> {
    let start = stdout.find('<')? + 1;
    let end = stdout[start..].find('>')? + start;
    let id = &stdout[start..end];
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// Map a `bjobs -noheader` line to a job state. Lines look like
/// `12345  user  DONE  queue  host  exec_host  job_name  date`.
/// `None` when the job is no longer known to bjobs.
fn parse_bjobs_state(line: &str) -> Option<JobState> {
    let status = line.split_whitespace().nth(2)?;
    match status {
        "PEND" | "PSUSP" | "WAIT" => Some(JobState::Submitted),
        "RUN" | "USUSP" | "SSUSP" => Some(JobState::Running),
        "DONE" => Some(JobState::Completed),
        "EXIT" | "ZOMBI" | "UNKWN" => Some(JobState::Failed),
        _ => None,
    }
}

#[async_trait]
impl Backend for LsfBackend {
    async fn submit(&self, job: &CollectorJob) -> CafResult<()> {
        tokio::fs::create_dir_all(&job.working_dir)
            .await
            .map_err(|e| CafError::io(&job.working_dir, e))?;
        if let Some(parent) = job.output_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CafError::io(parent, e))?;
        }
        let manifest = job.input_manifest();
        tokio::fs::write(&manifest, serde_json::to_vec_pretty(&job.input_files)?)
            .await
            .map_err(|e| CafError::io(&manifest, e))?;
        let script_path = job.working_dir.join("submit.sh");
        tokio::fs::write(&script_path, self.submit_script(job))
            .await
            .map_err(|e| CafError::io(&script_path, e))?;

        // bsub only reads #BSUB directives when the script arrives on stdin.
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("bsub < {}", script_path.display()))
            .output()
            .await
            .map_err(|e| CafError::io(&script_path, e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(CafError::CollectorJobFailure {
                job_id: job.id(),
                reason: format!(
                    "bsub failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let batch_id = parse_bsub_job_id(&stdout).ok_or_else(|| CafError::CollectorJobFailure {
            job_id: job.id(),
            reason: format!("could not parse bsub output: {}", stdout.trim()),
        })?;
        info!(job = %job.id(), batch_id = %batch_id, queue = %self.queue, "Submitted LSF job");

        let mut state = self.inner.lock().unwrap();
        state.jobs.insert(
            job.id(),
            LsfJob {
                batch_id,
                state: JobState::Submitted,
                output_file: job.output_file.clone(),
            },
        );
        state.transitions.push(JobTransition {
            job_id: job.id(),
            state: JobState::Submitted,
        });
        Ok(())
    }

    async fn poll(&self) -> CafResult<Vec<JobTransition>> {
        // Snapshot outside the lock; bjobs calls must not block submitters.
        let pending: Vec<(String, String)> = {
            let state = self.inner.lock().unwrap();
            state
                .jobs
                .iter()
                .filter(|(_, j)| !j.state.is_terminal())
                .map(|(id, j)| (id.clone(), j.batch_id.clone()))
                .collect()
        };

        let mut observed = Vec::new();
        for (job_id, batch_id) in pending {
            let output = Command::new("bjobs")
                .arg("-noheader")
                .arg(&batch_id)
                .output()
                .await
                .map_err(|e| CafError::io("bjobs", e))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            match stdout.lines().next().and_then(parse_bjobs_state) {
                Some(next) => observed.push((job_id, next)),
                None => {
                    // Finished jobs age out of bjobs; treat as done and let
                    // the output file decide success.
                    debug!(job = %job_id, batch_id = %batch_id, "Job no longer known to bjobs");
                    observed.push((job_id, JobState::Completed));
                }
            }
        }

        let mut state = self.inner.lock().unwrap();
        let mut transitions = std::mem::take(&mut state.transitions);
        for (job_id, mut next) in observed {
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if next == JobState::Completed && !job.output_file.exists() {
                warn!(job = %job_id, "LSF job finished but produced no output file");
                next = JobState::Failed;
            }
            if job.state != next {
                job.state = next;
                transitions.push(JobTransition {
                    job_id,
                    state: next,
                });
            }
        }
        Ok(transitions)
    }

    async fn states(&self) -> CafResult<HashMap<String, JobState>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .map(|(id, j)| (id.clone(), j.state))
            .collect())
    }

    async fn cancel_all(&self) -> CafResult<()> {
        let pending: Vec<(String, String)> = {
            let state = self.inner.lock().unwrap();
            state
                .jobs
                .iter()
                .filter(|(_, j)| !j.state.is_terminal())
                .map(|(id, j)| (id.clone(), j.batch_id.clone()))
                .collect()
        };
        for (job_id, batch_id) in &pending {
            warn!(job = %job_id, batch_id = %batch_id, "Cancelling LSF job with bkill");
            Command::new("bkill").arg(batch_id).status().await.ok();
        }
        let mut state = self.inner.lock().unwrap();
        for (job_id, _) in pending {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.state = JobState::Failed;
            }
            state.transitions.push(JobTransition {
                job_id,
                state: JobState::Failed,
            });
        }
        Ok(())
    }
}
