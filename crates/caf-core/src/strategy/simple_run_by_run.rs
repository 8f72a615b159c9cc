//! Independent per-run strategy.

use caf_domain::{CommittedPayload, ExpRun, Iov, IovResult, Payload, ResultCode};
use tracing::warn;

use crate::algorithm::Algorithm;
use crate::errors::CafResult;
use crate::strategy::{
    AlgorithmStrategy, Machine, MachineState, StrategyContext, StrategyParams, StrategyReport,
    execute_capped,
};

/// Executes every collected run on its own, never merging.
///
/// A run reporting `NotEnoughData` is recorded as a failure for exactly
/// its own slot and the walk continues, so sparse data shows up as many
/// small gaps instead of silently widening neighbouring payloads.
pub struct SimpleRunByRun {
    params: StrategyParams,
}

impl SimpleRunByRun {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

enum Outcome {
    Committed(Payload),
    NoPayload(ResultCode),
}

impl AlgorithmStrategy for SimpleRunByRun {
    fn name(&self) -> &'static str {
        "SimpleRunByRun"
    }

    fn run(
        &mut self,
        algorithm: &mut dyn Algorithm,
        ctx: &StrategyContext,
    ) -> CafResult<StrategyReport> {
        let mut machine = Machine::new(self.name(), algorithm.name());
        machine.to(MachineState::Executing);
        let coverage = ctx.iov_coverage;
        let cap = self.params.max_iterations;

        if ctx.run_range.is_empty() {
            warn!(algorithm = %algorithm.name(), "No collected runs to calibrate over");
            machine.to(MachineState::Failed);
            return Ok(StrategyReport {
                payloads: Vec::new(),
                failures: vec![IovResult::new(coverage, ResultCode::NotEnoughData)],
                state: machine.state(),
            });
        }

        let mut entries: Vec<(ExpRun, Outcome)> = Vec::new();
        let mut aborted = false;
        for run in ctx.run_range.iter() {
            let span = Iov::from_runs(&[run])?;
            let code = execute_capped(algorithm, &[run], ctx.iteration, cap, &span)?;
            match code {
                ResultCode::Ok => entries.push((run, Outcome::Committed(algorithm.commit()?))),
                ResultCode::NotEnoughData if self.params.allow_not_enough_data => {
                    warn!(%run, "Committing despite NotEnoughData (allowed)");
                    entries.push((run, Outcome::Committed(algorithm.commit()?)));
                }
                ResultCode::NotEnoughData => {
                    warn!(%run, "Not enough data, leaving a gap for this run");
                    entries.push((run, Outcome::NoPayload(code)));
                }
                code => {
                    warn!(%run, %code, "Algorithm failed, aborting the walk");
                    entries.push((run, Outcome::NoPayload(code)));
                    aborted = true;
                    break;
                }
            }
        }

        // Each entry's slot reaches to just before the next collected run;
        // the outer edges clamp to the coverage bounds.
        let mut payloads = Vec::new();
        let mut failures = Vec::new();
        let total = entries.len();
        for (i, (run, outcome)) in entries.into_iter().enumerate() {
            let low = if i == 0 { coverage.low() } else { run };
            let (exp_high, run_high) = if i + 1 < total {
                // Safe: entries follow the sorted run range.
                let next = ctx.run_range.runs()[i + 1];
                match next.predecessor() {
                    Some(p) => (i64::from(p.experiment), i64::from(p.run)),
                    None => (i64::from(next.experiment) - 1, caf_domain::iov::OPEN),
                }
            } else {
                (coverage.exp_high, coverage.run_high)
            };
            let iov = Iov::new(low.experiment, low.run, exp_high, run_high)?;
            match outcome {
                Outcome::Committed(payload) => payloads.push(CommittedPayload { iov, payload }),
                Outcome::NoPayload(code) => failures.push(IovResult::new(iov, code)),
            }
        }

        let failed = aborted || payloads.is_empty();
        machine.to(if failed {
            MachineState::Failed
        } else {
            MachineState::Done
        });
        Ok(StrategyReport {
            payloads,
            failures,
            state: machine.state(),
        })
    }
}
