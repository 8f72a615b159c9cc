//! Algorithm execution strategies.
//!
//! A strategy decides how the collected run range is carved into execution
//! sub-ranges, drives the algorithm over them through a small state
//! machine, and assigns each committed payload its final validity
//! interval. Committed payloads always tile the requested coverage: the
//! first payload's low edge is pulled down to the coverage low and the
//! last payload's high edge is pushed up to the coverage high, whatever
//! runs actually had data.

use std::collections::BTreeMap;

use caf_domain::iov::OPEN;
use caf_domain::{CommittedPayload, ExpRun, Iov, IovResult, ResultCode, RunRange};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::algorithm::Algorithm;
use crate::errors::{CafError, CafResult};

mod sequential_boundaries;
mod sequential_run_by_run;
mod simple_run_by_run;
mod single_iov;

pub use sequential_boundaries::SequentialBoundaries;
pub use sequential_run_by_run::SequentialRunByRun;
pub use simple_run_by_run::SimpleRunByRun;
pub use single_iov::SingleIov;

/// Iteration cap in the default parameter set. Plans may raise it or
/// disable it entirely with `max_iterations: null`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// The built-in strategies, as named in calibration plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SingleIov,
    SequentialRunByRun,
    SimpleRunByRun,
    SequentialBoundaries,
}

impl StrategyKind {
    pub fn build(self, params: StrategyParams) -> Box<dyn AlgorithmStrategy> {
        match self {
            StrategyKind::SingleIov => Box::new(SingleIov::new(params)),
            StrategyKind::SequentialRunByRun => Box::new(SequentialRunByRun::new(params)),
            StrategyKind::SimpleRunByRun => Box::new(SimpleRunByRun::new(params)),
            StrategyKind::SequentialBoundaries => Box::new(SequentialBoundaries::new(params)),
        }
    }
}

/// Knobs shared by all strategies, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// How many runs each growth step adds in the sequential strategies.
    pub step_size: usize,
    /// Cap on in-place `Iterate` repeats; `None` removes the cap and lets
    /// the algorithm iterate for as long as it asks to.
    pub max_iterations: Option<u32>,
    /// Commit anyway when the final result is `NotEnoughData` and there is
    /// no earlier payload to merge into.
    pub allow_not_enough_data: bool,
    /// Cut points for `SequentialBoundaries`; ignored by the others.
    pub payload_boundaries: Vec<ExpRun>,
    /// Opaque algorithm-specific settings, passed through unvalidated.
    pub expert: BTreeMap<String, serde_json::Value>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            step_size: 1,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            allow_not_enough_data: false,
            payload_boundaries: Vec::new(),
            expert: BTreeMap::new(),
        }
    }
}

/// What a strategy execution runs over.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// The coverage requested for this calibration run.
    pub iov_coverage: Iov,
    /// Runs with successfully collected data, ignored runs already removed.
    pub run_range: RunRange,
    /// Calibration-level iteration number, forwarded to the algorithm.
    pub iteration: u32,
}

/// Strategy execution states. One-way: Pending → Executing → Done/Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineState {
    Pending,
    Executing,
    Done,
    Failed,
}

/// The outcome of one full strategy pass.
#[derive(Debug, Clone)]
pub struct StrategyReport {
    /// Committed payloads, in ascending IoV order, tiling the coverage.
    pub payloads: Vec<CommittedPayload>,
    /// Sub-ranges that produced no payload, with the offending result.
    pub failures: Vec<IovResult>,
    pub state: MachineState,
}

impl StrategyReport {
    pub fn is_done(&self) -> bool {
        self.state == MachineState::Done
    }
}

pub trait AlgorithmStrategy: Send {
    fn name(&self) -> &'static str;

    /// Drive `algorithm` over the context's run range to completion.
    ///
    /// `Ok` with a `Failed` report means the algorithm legitimately could
    /// not calibrate part of the range; `Err` means the machinery itself
    /// gave up (iteration cap, commit failure, unexpected result code).
    fn run(
        &mut self,
        algorithm: &mut dyn Algorithm,
        ctx: &StrategyContext,
    ) -> CafResult<StrategyReport>;
}

/// Logged state machine shared by the strategy implementations.
pub(crate) struct Machine {
    strategy: &'static str,
    algorithm: String,
    state: MachineState,
}

impl Machine {
    pub(crate) fn new(strategy: &'static str, algorithm: &str) -> Self {
        Self {
            strategy,
            algorithm: algorithm.to_string(),
            state: MachineState::Pending,
        }
    }

    pub(crate) fn to(&mut self, next: MachineState) {
        info!(
            strategy = self.strategy,
            algorithm = %self.algorithm,
            from = ?self.state,
            to = ?next,
            "Strategy state transition"
        );
        self.state = next;
    }

    pub(crate) fn state(&self) -> MachineState {
        self.state
    }
}

/// Execute over `runs`, repeating in place while the algorithm asks to
/// `Iterate`, up to `cap` repeats (uncapped when `None`). `span` is only
/// used for error reporting.
pub(crate) fn execute_capped(
    algorithm: &mut dyn Algorithm,
    runs: &[ExpRun],
    base_iteration: u32,
    cap: Option<u32>,
    span: &Iov,
) -> CafResult<ResultCode> {
    let mut repeats = 0u32;
    loop {
        let code = algorithm.execute(runs, base_iteration + repeats);
        match code {
            ResultCode::Iterate => {
                repeats += 1;
                debug!(algorithm = %algorithm.name(), repeats, "Algorithm requested another iteration");
                if let Some(limit) = cap {
                    if repeats >= limit {
                        return Err(CafError::MaxIterationsExceeded {
                            algorithm: algorithm.name().to_string(),
                            limit,
                            iov: *span,
                        });
                    }
                }
            }
            ResultCode::Undefined => {
                return Err(CafError::UnexpectedResult {
                    algorithm: algorithm.name().to_string(),
                    code,
                })
            }
            other => return Ok(other),
        }
    }
}

/// The high bound of a payload whose successor starts at `next_low`.
fn high_before(next_low: ExpRun) -> (i64, i64) {
    match next_low.predecessor() {
        Some(p) => (p.experiment as i64, p.run as i64),
        // Crossing into a new experiment: run to the end of the previous one.
        None => (i64::from(next_low.experiment) - 1, OPEN),
    }
}

/// Assign validity intervals to committed sub-ranges given their start
/// runs (strictly ascending) so the payloads tile `coverage` exactly:
/// first low clamps down to the coverage low, each intermediate high
/// reaches to just before the next start, the last high clamps up to the
/// coverage high.
pub(crate) fn tile_coverage(starts: &[ExpRun], coverage: &Iov) -> CafResult<Vec<Iov>> {
    let mut iovs = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let low = if i == 0 { coverage.low() } else { *start };
        let (exp_high, run_high) = match starts.get(i + 1) {
            Some(next) => high_before(*next),
            None => (coverage.exp_high, coverage.run_high),
        };
        iovs.push(Iov::new(low.experiment, low.run, exp_high, run_high)?);
    }
    Ok(iovs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(e: u32, r: u32) -> ExpRun {
        ExpRun::new(e, r)
    }

    #[test]
    fn test_tile_single_start_spans_whole_coverage() {
        let coverage = Iov::new(0, 0, 0, OPEN).unwrap();
        let iovs = tile_coverage(&[run(0, 3)], &coverage).unwrap();
        assert_eq!(iovs, vec![coverage]);
    }

    #[test]
    fn test_tile_clamps_edges_and_bridges_gaps() {
        // Data started at run 2 and the second commit starts at run 7;
        // runs 5-6 had no data but end up covered by the first payload.
        let coverage = Iov::new(0, 0, 0, 10).unwrap();
        let iovs = tile_coverage(&[run(0, 2), run(0, 7)], &coverage).unwrap();
        assert_eq!(iovs[0], Iov::new(0, 0, 0, 6).unwrap());
        assert_eq!(iovs[1], Iov::new(0, 7, 0, 10).unwrap());
    }

    #[test]
    fn test_tile_across_experiment_boundary() {
        let coverage = Iov::new(0, 0, 1, OPEN).unwrap();
        let iovs = tile_coverage(&[run(0, 0), run(1, 0)], &coverage).unwrap();
        assert_eq!(iovs[0], Iov::new(0, 0, 0, OPEN).unwrap());
        assert_eq!(iovs[1], Iov::new(1, 0, 1, OPEN).unwrap());
    }

    #[test]
    fn test_tile_empty_starts() {
        let coverage = Iov::new(0, 0, 0, 10).unwrap();
        assert!(tile_coverage(&[], &coverage).unwrap().is_empty());
    }
}
