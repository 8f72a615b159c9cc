//! Collector job backends.
//!
//! A backend owns jobs from `submit` until they reach a terminal state;
//! the orchestrator observes progress through `poll` transitions and the
//! `states` snapshot, and never inspects a running job's directories.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use caf_state::JobState;
use tracing::{info, warn};

use crate::errors::{CafError, CafResult};
use crate::job::{CollectorJob, JobTransition};

mod local;
mod lsf;

pub use local::LocalBackend;
pub use lsf::LsfBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Accept a job. The backend prepares the working directory (including
    /// the `input_files.json` manifest) and either launches or queues it.
    async fn submit(&self, job: &CollectorJob) -> CafResult<()>;

    /// Observe state changes since the last poll.
    async fn poll(&self) -> CafResult<Vec<JobTransition>>;

    /// Current state of every submitted job.
    async fn states(&self) -> CafResult<HashMap<String, JobState>>;

    /// Best-effort cancellation of all non-terminal jobs.
    async fn cancel_all(&self) -> CafResult<()>;

    /// Poll at `heartbeat` intervals until every job is terminal.
    ///
    /// On timeout, cancels outstanding jobs and returns
    /// `CafError::BackendTimeout`.
    async fn wait_all(&self, timeout: Duration, heartbeat: Duration) -> CafResult<()> {
        let started = Instant::now();
        loop {
            for transition in self.poll().await? {
                info!(job = %transition.job_id, state = ?transition.state, "Job transition");
            }
            let states = self.states().await?;
            if states.values().all(|s| s.is_terminal()) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                warn!(waited = ?started.elapsed(), "Backend timed out, cancelling jobs");
                self.cancel_all().await?;
                return Err(CafError::BackendTimeout {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(heartbeat).await;
        }
    }
}
