//! Scripted fakes for the algorithm and backend seams (testing only).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use caf_domain::{ExpRun, Payload, ResultCode};
use caf_state::JobState;
use serde_json::json;

use crate::algorithm::Algorithm;
use crate::backend::Backend;
use crate::errors::CafResult;
use crate::job::{CollectorJob, JobTransition};

/// Returns a pre-programmed sequence of result codes, then `Ok` forever.
///
/// Records every execute call so tests can assert which sub-ranges a
/// strategy actually ran over.
pub struct ScriptedAlgorithm {
    name: String,
    script: VecDeque<ResultCode>,
    commits: u32,
    pub executed: Vec<Vec<ExpRun>>,
    pub inputs: Vec<PathBuf>,
    pub global_tag: Option<String>,
}

impl ScriptedAlgorithm {
    pub fn new(name: impl Into<String>, script: impl IntoIterator<Item = ResultCode>) -> Self {
        Self {
            name: name.into(),
            script: script.into_iter().collect(),
            commits: 0,
            executed: Vec::new(),
            inputs: Vec::new(),
            global_tag: None,
        }
    }

    /// An algorithm that always succeeds.
    pub fn always_ok(name: impl Into<String>) -> Self {
        Self::new(name, [])
    }

    pub fn commits(&self) -> u32 {
        self.commits
    }
}

impl Algorithm for ScriptedAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_inputs(&mut self, files: &[PathBuf]) {
        self.inputs = files.to_vec();
    }

    fn set_global_tag(&mut self, tag: &str) {
        self.global_tag = Some(tag.to_string());
    }

    fn execute(&mut self, runs: &[ExpRun], _iteration: u32) -> ResultCode {
        self.executed.push(runs.to_vec());
        self.script.pop_front().unwrap_or(ResultCode::Ok)
    }

    fn commit(&mut self) -> CafResult<Payload> {
        self.commits += 1;
        Ok(Payload::new(
            &self.name,
            json!({ "commit": self.commits }),
        ))
    }
}

/// Hands the engine ownership of a scripted algorithm while the test
/// keeps a handle to inspect it afterwards.
pub struct SharedAlgorithm {
    name: String,
    inner: std::sync::Arc<Mutex<ScriptedAlgorithm>>,
}

impl SharedAlgorithm {
    pub fn new(
        algorithm: ScriptedAlgorithm,
    ) -> (Self, std::sync::Arc<Mutex<ScriptedAlgorithm>>) {
        let name = algorithm.name.clone();
        let inner = std::sync::Arc::new(Mutex::new(algorithm));
        (
            Self {
                name,
                inner: inner.clone(),
            },
            inner,
        )
    }
}

impl Algorithm for SharedAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_inputs(&mut self, files: &[PathBuf]) {
        self.inner.lock().unwrap().set_inputs(files);
    }

    fn set_global_tag(&mut self, tag: &str) {
        self.inner.lock().unwrap().set_global_tag(tag);
    }

    fn execute(&mut self, runs: &[ExpRun], iteration: u32) -> ResultCode {
        self.inner.lock().unwrap().execute(runs, iteration)
    }

    fn commit(&mut self) -> CafResult<Payload> {
        self.inner.lock().unwrap().commit()
    }
}

#[derive(Default)]
struct InstantState {
    states: HashMap<String, JobState>,
    transitions: Vec<JobTransition>,
    submitted: Vec<String>,
}

/// A backend whose jobs finish the moment they are submitted.
///
/// Jobs belonging to calibrations named in `failing` fail; everything
/// else completes. No processes are spawned and no directories created.
#[derive(Default)]
pub struct InstantBackend {
    failing: HashSet<String>,
    inner: Mutex<InstantState>,
}

impl InstantBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(calibrations: impl IntoIterator<Item = String>) -> Self {
        Self {
            failing: calibrations.into_iter().collect(),
            inner: Mutex::new(InstantState::default()),
        }
    }

    /// Job ids in submission order, for asserting what never ran.
    pub fn submitted(&self) -> Vec<String> {
        self.inner.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl Backend for InstantBackend {
    async fn submit(&self, job: &CollectorJob) -> CafResult<()> {
        let state = if self.failing.contains(&job.calibration) {
            JobState::Failed
        } else {
            JobState::Completed
        };
        let mut inner = self.inner.lock().unwrap();
        inner.submitted.push(job.id());
        inner.states.insert(job.id(), state);
        inner.transitions.push(JobTransition {
            job_id: job.id(),
            state,
        });
        Ok(())
    }

    async fn poll(&self) -> CafResult<Vec<JobTransition>> {
        Ok(std::mem::take(&mut self.inner.lock().unwrap().transitions))
    }

    async fn states(&self) -> CafResult<HashMap<String, JobState>> {
        Ok(self.inner.lock().unwrap().states.clone())
    }

    async fn cancel_all(&self) -> CafResult<()> {
        Ok(())
    }
}
