//! The `Algorithm` seam between strategies and calibration code.
//!
//! Strategies only ever see the [`Algorithm`] trait: hand it a run list,
//! get back a [`ResultCode`], and commit a payload once the result is
//! acceptable. [`CommandAlgorithm`] is the production implementation that
//! shells out to an external executable; tests use the scripted fake in
//! [`crate::fakes`].

use std::path::{Path, PathBuf};
use std::process::Command;

use caf_domain::{ExpRun, Payload, ResultCode};
use tracing::{debug, warn};

use crate::errors::{CafError, CafResult};

/// A calibration algorithm as seen by a strategy.
///
/// `execute` must be repeatable: a strategy may call it several times with
/// growing run lists (merging) or with the same list at increasing
/// iteration numbers (`Iterate` handling) before it ever calls `commit`.
/// `commit` consumes the state of the *most recent* successful execute.
pub trait Algorithm: Send {
    fn name(&self) -> &str;

    /// Point the algorithm at the collected output files for this pass.
    fn set_inputs(&mut self, files: &[PathBuf]);

    /// Global tag forwarded to the conditions lookup, if any.
    fn set_global_tag(&mut self, tag: &str);

    /// Run over `runs` at the given iteration number.
    fn execute(&mut self, runs: &[ExpRun], iteration: u32) -> ResultCode;

    /// Produce the payload for the last successful execute.
    fn commit(&mut self) -> CafResult<Payload>;
}

/// Runs an external executable implementing the CAF algorithm protocol.
///
/// The protocol has two subcommands:
///
/// ```text
/// <cmd> execute --iteration N --runs e.r,e.r,...   exit code = ResultCode
/// <cmd> commit --output <path>                     writes payload JSON
/// ```
///
/// Input files and the global tag travel via the `CAF_INPUT_FILES`
/// (colon-separated) and `CAF_GLOBAL_TAG` environment variables.
#[derive(Debug)]
pub struct CommandAlgorithm {
    name: String,
    cmd: Vec<String>,
    work_dir: PathBuf,
    inputs: Vec<PathBuf>,
    global_tag: Option<String>,
}

impl CommandAlgorithm {
    /// `cmd` is the executable and its fixed leading arguments; the
    /// protocol subcommands are appended per call. Panics if `cmd` is
    /// empty.
    pub fn new(name: impl Into<String>, cmd: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        assert!(!cmd.is_empty(), "algorithm command must not be empty");
        Self {
            name: name.into(),
            cmd,
            work_dir: work_dir.into(),
            inputs: Vec::new(),
            global_tag: None,
        }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.cmd[0]);
        command.args(&self.cmd[1..]);
        command.current_dir(&self.work_dir);
        command.env(
            "CAF_INPUT_FILES",
            self.inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(":"),
        );
        if let Some(tag) = &self.global_tag {
            command.env("CAF_GLOBAL_TAG", tag);
        }
        command
    }

    fn runs_argument(runs: &[ExpRun]) -> String {
        runs.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn payload_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}_payload.json", self.name))
    }
}

impl Algorithm for CommandAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_inputs(&mut self, files: &[PathBuf]) {
        self.inputs = files.to_vec();
    }

    fn set_global_tag(&mut self, tag: &str) {
        self.global_tag = Some(tag.to_string());
    }

    fn execute(&mut self, runs: &[ExpRun], iteration: u32) -> ResultCode {
        let mut command = self.base_command();
        command
            .arg("execute")
            .arg("--iteration")
            .arg(iteration.to_string())
            .arg("--runs")
            .arg(Self::runs_argument(runs));
        debug!(algorithm = %self.name, runs = runs.len(), iteration, "Executing algorithm");
        match command.status() {
            Ok(status) => {
                let code = status
                    .code()
                    .map_or(ResultCode::Undefined, ResultCode::from_code);
                debug!(algorithm = %self.name, %code, "Algorithm finished");
                code
            }
            Err(e) => {
                warn!(algorithm = %self.name, error = %e, "Failed to spawn algorithm");
                ResultCode::Failure
            }
        }
    }

    fn commit(&mut self) -> CafResult<Payload> {
        let output = self.payload_path();
        let mut command = self.base_command();
        command.arg("commit").arg("--output").arg(&output);
        let status = command.status().map_err(|e| CafError::CommitFailed {
            algorithm: self.name.clone(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(CafError::CommitFailed {
                algorithm: self.name.clone(),
                reason: format!("commit exited with {status}"),
            });
        }
        let content = std::fs::read(&output).map_err(|e| CafError::io(&output, e))?;
        let data: serde_json::Value = serde_json::from_slice(&content)?;
        Ok(Payload::new(&self.name, data))
    }
}

fn _assert_object_safe(_: &dyn Algorithm) {}
