//! The CAF orchestrator: dependency-ordered execution of calibrations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use caf_domain::{ExpRun, Iov, RunRange};
use caf_state::{
    AlgorithmSummary, CalibrationLedger, CalibrationMarker, CalibrationStatus, JobRecord, JobState,
    PayloadRecord,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::calibration::Calibration;
use crate::errors::{CafError, CafResult};
use crate::job::CollectorJob;
use crate::strategy::StrategyContext;

/// Engine-level settings, fixed for one `Caf`.
#[derive(Debug, Clone)]
pub struct CafConfig {
    /// Root of the on-disk state: markers, payloads, job directories.
    pub output_dir: PathBuf,
    /// Backend polling interval while collector jobs run.
    pub heartbeat: Duration,
    /// How long one calibration's collection phase may take.
    pub collect_timeout: Duration,
}

impl CafConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            heartbeat: Duration::from_secs(10),
            collect_timeout: Duration::from_secs(3600),
        }
    }
}

/// Final state of one calibration after a `Caf::run`.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub name: String,
    pub status: CalibrationStatus,
    pub algorithms: Vec<AlgorithmSummary>,
    /// Set when the calibration never ran because this dependency failed.
    pub skipped_due_to: Option<String>,
}

/// What `Caf::run` hands back to the caller.
#[derive(Debug, Clone, Default)]
pub struct CafReport {
    /// Outcomes in execution order.
    pub calibrations: Vec<CalibrationOutcome>,
}

impl CafReport {
    pub fn all_complete(&self) -> bool {
        self.calibrations
            .iter()
            .all(|c| c.status == CalibrationStatus::Completed)
    }

    pub fn outcome(&self, name: &str) -> Option<&CalibrationOutcome> {
        self.calibrations.iter().find(|c| c.name == name)
    }
}

/// Owns the calibration graph and drives it to completion.
///
/// Calibrations execute one at a time in topological order; the
/// parallelism lives inside the backend, across the collector jobs of the
/// running calibration.
pub struct Caf {
    calibrations: BTreeMap<String, Calibration>,
    backend: Arc<dyn Backend>,
    ledger: Arc<dyn CalibrationLedger>,
    config: CafConfig,
}

impl Caf {
    pub fn new(
        backend: Arc<dyn Backend>,
        ledger: Arc<dyn CalibrationLedger>,
        config: CafConfig,
    ) -> Self {
        Self {
            calibrations: BTreeMap::new(),
            backend,
            ledger,
            config,
        }
    }

    pub fn add_calibration(&mut self, calibration: Calibration) -> CafResult<()> {
        if let Err(reason) = calibration.is_valid() {
            return Err(CafError::InvalidCalibration {
                name: calibration.name.clone(),
                reason,
            });
        }
        if self.calibrations.contains_key(&calibration.name) {
            return Err(CafError::DuplicateCalibration(calibration.name));
        }
        self.calibrations
            .insert(calibration.name.clone(), calibration);
        Ok(())
    }

    /// Drop dependencies on calibrations that were never added.
    fn prune_missing_dependencies(&mut self) {
        let known: BTreeSet<String> = self.calibrations.keys().cloned().collect();
        for calibration in self.calibrations.values_mut() {
            let missing: Vec<String> = calibration
                .dependencies
                .iter()
                .filter(|d| !known.contains(*d))
                .cloned()
                .collect();
            for dep in missing {
                warn!(
                    calibration = %calibration.name,
                    dependency = %dep,
                    "Dropping dependency on unknown calibration"
                );
                calibration.dependencies.remove(&dep);
            }
        }
    }

    /// Kahn's algorithm over the dependency graph; alphabetical among
    /// ready nodes so the order is deterministic.
    fn topological_order(&self) -> CafResult<Vec<String>> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, calibration) in &self.calibrations {
            indegree.entry(name).or_insert(0);
            for dep in &calibration.dependencies {
                *indegree.entry(name).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(name);
            }
        }
        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut order = Vec::with_capacity(self.calibrations.len());
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            order.push(name.to_string());
            for &dependent in dependents.get(name).into_iter().flatten() {
                let d = indegree.get_mut(dependent).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.insert(dependent);
                }
            }
        }
        if order.len() != self.calibrations.len() {
            let stuck = indegree
                .iter()
                .find(|(_, &d)| d > 0)
                .map(|(&n, _)| n.to_string())
                .unwrap_or_default();
            return Err(CafError::DependencyCycle(stuck));
        }
        Ok(order)
    }

    /// Run every added calibration over the requested coverage.
    ///
    /// Calibrations already marked `Completed` in the ledger are skipped,
    /// which is what makes an interrupted run resumable. A failure (or a
    /// skip forced by a failed dependency) never aborts the whole run;
    /// independent branches of the graph still execute.
    pub async fn run(&mut self, iov_coverage: Iov) -> CafResult<CafReport> {
        self.prune_missing_dependencies();
        let order = self.topological_order()?;
        info!(
            calibrations = order.len(),
            coverage = %iov_coverage,
            "Starting calibration run"
        );

        let mut statuses: HashMap<String, CalibrationStatus> = HashMap::new();
        let mut report = CafReport::default();
        for name in order {
            let calibration = self.calibrations.get_mut(&name).unwrap();

            let failed_dep = calibration
                .dependencies
                .iter()
                .find(|d| statuses.get(*d) != Some(&CalibrationStatus::Completed))
                .cloned();
            if let Some(dep) = failed_dep {
                warn!(calibration = %name, dependency = %dep, "Skipping, dependency did not complete");
                let marker = CalibrationMarker::started(&name)
                    .finish(CalibrationStatus::Failed, Vec::new());
                self.ledger.write_marker(&marker).await?;
                statuses.insert(name.clone(), CalibrationStatus::Failed);
                report.calibrations.push(CalibrationOutcome {
                    name,
                    status: CalibrationStatus::Failed,
                    algorithms: Vec::new(),
                    skipped_due_to: Some(dep),
                });
                continue;
            }

            if self.ledger.is_complete(&name).await? {
                info!(calibration = %name, "Already completed in a previous run, skipping");
                let marker = self.ledger.read_marker(&name).await?;
                statuses.insert(name.clone(), CalibrationStatus::Completed);
                report.calibrations.push(CalibrationOutcome {
                    name,
                    status: CalibrationStatus::Completed,
                    algorithms: marker.algorithms,
                    skipped_due_to: None,
                });
                continue;
            }

            let marker = CalibrationMarker::started(&name);
            self.ledger.write_marker(&marker).await?;
            info!(calibration = %name, "Starting calibration");

            let summaries = match execute_calibration(
                calibration,
                self.backend.as_ref(),
                self.ledger.as_ref(),
                &self.config,
                iov_coverage,
            )
            .await
            {
                Ok(summaries) => summaries,
                Err(e) => {
                    warn!(calibration = %name, error = %e, "Calibration errored");
                    Vec::new()
                }
            };

            // Complete when at least one algorithm reached Done.
            let status = if summaries.iter().any(|s| s.done) {
                CalibrationStatus::Completed
            } else {
                CalibrationStatus::Failed
            };
            self.ledger
                .write_marker(&marker.finish(status, summaries.clone()))
                .await?;
            info!(calibration = %name, status = ?status, "Calibration finished");
            statuses.insert(name.clone(), status);
            report.calibrations.push(CalibrationOutcome {
                name,
                status,
                algorithms: summaries,
                skipped_due_to: None,
            });
        }
        Ok(report)
    }
}

/// The runs an input file's IoV stands for.
///
/// Closed single-experiment intervals enumerate their runs; open or
/// cross-experiment intervals fall back to their edge runs, which is all
/// the engine can know without opening the file.
fn runs_of(iov: &Iov) -> Vec<ExpRun> {
    match iov.high() {
        Some(high) if high.experiment == iov.exp_low && high.run != u32::MAX => (iov.run_low
            ..=high.run)
            .map(|r| ExpRun::new(iov.exp_low, r))
            .collect(),
        Some(high) if high.run != u32::MAX => vec![iov.low(), high],
        _ => vec![iov.low()],
    }
}

fn fully_ignored(iov: &Iov, ignored: &BTreeSet<ExpRun>) -> bool {
    if ignored.is_empty() {
        return false;
    }
    let runs = runs_of(iov);
    !runs.is_empty() && runs.iter().all(|r| ignored.contains(r))
}

/// Split `files` into at most `max_jobs` chunks of at most
/// `max_files_per_job` files, re-chunking evenly when the job cap wins.
fn chunk_files(files: &[PathBuf], max_files_per_job: usize, max_jobs: usize) -> Vec<Vec<PathBuf>> {
    if files.is_empty() {
        return Vec::new();
    }
    let mut per_job = max_files_per_job.max(1);
    let jobs_needed = files.len().div_ceil(per_job);
    if jobs_needed > max_jobs.max(1) {
        per_job = files.len().div_ceil(max_jobs.max(1));
    }
    files.chunks(per_job).map(|c| c.to_vec()).collect()
}

async fn execute_calibration(
    calibration: &mut Calibration,
    backend: &dyn Backend,
    ledger: &dyn CalibrationLedger,
    config: &CafConfig,
    coverage: Iov,
) -> CafResult<Vec<AlgorithmSummary>> {
    // Partition input files into collector jobs, per collection.
    let mut file_iovs: BTreeMap<PathBuf, Iov> = BTreeMap::new();
    let mut jobs: Vec<CollectorJob> = Vec::new();
    for collection in &calibration.collections {
        let mut eligible: Vec<PathBuf> = Vec::new();
        for file in &collection.input_files {
            let Some(iov) = collection.files_to_iovs.get(file) else {
                warn!(collection = %collection.name, file = %file.display(), "No IoV known for input file, skipping");
                continue;
            };
            if !iov.overlaps(&coverage) {
                continue;
            }
            if fully_ignored(iov, &calibration.ignored_runs) {
                continue;
            }
            file_iovs.insert(file.clone(), *iov);
            eligible.push(file.clone());
        }
        for chunk in chunk_files(&eligible, collection.max_files_per_job, collection.max_jobs) {
            let index = jobs.len();
            let working_dir = config
                .output_dir
                .join(&calibration.name)
                .join("jobs")
                .join(index.to_string());
            let output_file = working_dir.join(&collection.output_name);
            jobs.push(CollectorJob {
                calibration: calibration.name.clone(),
                index,
                cmd: collection.cmd.clone(),
                input_files: chunk,
                working_dir,
                output_file,
            });
        }
    }
    if jobs.is_empty() {
        warn!(calibration = %calibration.name, "No input files overlap the requested coverage");
        return Ok(Vec::new());
    }

    // Collection phase.
    info!(calibration = %calibration.name, jobs = jobs.len(), "Submitting collector jobs");
    for job in &jobs {
        backend.submit(job).await?;
    }
    backend
        .wait_all(config.collect_timeout, config.heartbeat)
        .await?;

    let states = backend.states().await?;
    let mut collected_outputs: Vec<PathBuf> = Vec::new();
    let mut collected_runs: BTreeSet<ExpRun> = BTreeSet::new();
    for job in &jobs {
        let state = states.get(&job.id()).copied().unwrap_or(JobState::Failed);
        ledger
            .record_job(&JobRecord {
                calibration: calibration.name.clone(),
                job_index: job.index,
                state,
                output_file: (state == JobState::Completed).then(|| job.output_file.clone()),
                exit_code: None,
            })
            .await?;
        if state == JobState::Completed {
            collected_outputs.push(job.output_file.clone());
            for file in &job.input_files {
                if let Some(iov) = file_iovs.get(file) {
                    collected_runs.extend(runs_of(iov));
                }
            }
        } else {
            warn!(job = %job.id(), state = ?state, "Collector job did not complete");
        }
    }
    if collected_outputs.is_empty() {
        warn!(calibration = %calibration.name, "Every collector job failed");
        return Ok(Vec::new());
    }

    let run_range = RunRange::new(collected_runs)
        .subtract(&calibration.ignored_runs)
        .restrict_to(&coverage);
    info!(
        calibration = %calibration.name,
        runs = run_range.len(),
        "Collection finished, running algorithms"
    );

    // Algorithm phase: each algorithm picks its own sub-ranges over the
    // shared collected run range.
    let mut summaries = Vec::with_capacity(calibration.algorithms.len());
    for setup in &mut calibration.algorithms {
        setup.algorithm.set_inputs(&collected_outputs);
        if let Some(tag) = &calibration.global_tag {
            setup.algorithm.set_global_tag(tag);
        }
        let algorithm_name = setup.algorithm.name().to_string();
        let ctx = StrategyContext {
            iov_coverage: coverage,
            run_range: run_range.clone(),
            iteration: 0,
        };
        let mut strategy = setup.strategy.build(setup.params.clone());
        match strategy.run(setup.algorithm.as_mut(), &ctx) {
            Ok(report) => {
                for committed in &report.payloads {
                    ledger
                        .record_payload(&PayloadRecord {
                            calibration: calibration.name.clone(),
                            algorithm: algorithm_name.clone(),
                            committed: committed.clone(),
                            recorded_at: Utc::now(),
                        })
                        .await?;
                }
                summaries.push(AlgorithmSummary {
                    name: algorithm_name,
                    committed: report.payloads.iter().map(|p| p.iov).collect(),
                    failures: report.failures.clone(),
                    done: report.is_done(),
                });
            }
            Err(e) => {
                warn!(algorithm = %algorithm_name, error = %e, "Algorithm strategy errored");
                summaries.push(AlgorithmSummary {
                    name: algorithm_name,
                    committed: Vec::new(),
                    failures: Vec::new(),
                    done: false,
                });
            }
        }
    }
    Ok(summaries)
}
