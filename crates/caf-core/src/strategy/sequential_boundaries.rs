//! Boundary-driven sequential strategy.

use caf_domain::{CommittedPayload, ExpRun, Iov, IovResult, Payload, ResultCode};
use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::errors::{CafError, CafResult};
use crate::strategy::{
    AlgorithmStrategy, Machine, MachineState, StrategyContext, StrategyParams, StrategyReport,
    execute_capped, tile_coverage,
};

/// Calibrates between caller-supplied payload boundaries.
///
/// Runs are grouped by which boundary interval they fall into, so payload
/// edges land exactly on the configured cut points. A segment reporting
/// `NotEnoughData` merges forward into the next segment (the resulting
/// payload then starts at the earlier boundary); a trailing one merges
/// backwards like [`super::SequentialRunByRun`].
pub struct SequentialBoundaries {
    params: StrategyParams,
}

impl SequentialBoundaries {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

struct Commit {
    start: ExpRun,
    payload: Payload,
    runs: Vec<ExpRun>,
}

impl AlgorithmStrategy for SequentialBoundaries {
    fn name(&self) -> &'static str {
        "SequentialBoundaries"
    }

    fn run(
        &mut self,
        algorithm: &mut dyn Algorithm,
        ctx: &StrategyContext,
    ) -> CafResult<StrategyReport> {
        let mut boundaries = self.params.payload_boundaries.clone();
        boundaries.sort();
        boundaries.dedup();
        if boundaries.is_empty() {
            return Err(CafError::StrategyConfig {
                strategy: self.name(),
                reason: "payload_boundaries must not be empty".to_string(),
            });
        }

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

        // Group runs by boundary interval; anything before the first
        // boundary joins the first segment. Dataless segments are dropped,
        // the tiling later absorbs their range into the preceding payload.
        let mut grouped: Vec<Vec<ExpRun>> = vec![Vec::new(); boundaries.len()];
        for run in ctx.run_range.iter() {
            let idx = boundaries.partition_point(|b| *b <= run).saturating_sub(1);
            grouped[idx].push(run);
        }
        let segments: Vec<(ExpRun, Vec<ExpRun>)> = boundaries
            .into_iter()
            .zip(grouped)
            .filter(|(_, runs)| !runs.is_empty())
            .collect();

        let total = segments.len();
        let mut committed: Vec<Commit> = Vec::new();
        let mut failures: Vec<IovResult> = Vec::new();
        let mut carry: Vec<ExpRun> = Vec::new();
        let mut carry_start: Option<ExpRun> = None;
        let mut failed = false;

        for (i, (boundary, seg_runs)) in segments.into_iter().enumerate() {
            let start = carry_start.take().unwrap_or(boundary);
            let mut current = std::mem::take(&mut carry);
            current.extend(seg_runs);
            let span = Iov::from_runs(&current)?;
            let code = execute_capped(algorithm, &current, ctx.iteration, cap, &span)?;
            match code {
                ResultCode::Ok => {
                    let payload = algorithm.commit()?;
                    committed.push(Commit {
                        start,
                        payload,
                        runs: current,
                    });
                }
                ResultCode::NotEnoughData if i + 1 < total => {
                    debug!(span = %span, "Not enough data, merging into next segment");
                    carry = current;
                    carry_start = Some(start);
                }
                ResultCode::NotEnoughData => {
                    if let Some(mut previous) = committed.pop() {
                        debug!(span = %span, "Trailing NotEnoughData, merging into previous segment");
                        previous.runs.extend(current);
                        let merged_span = Iov::from_runs(&previous.runs)?;
                        let code =
                            execute_capped(algorithm, &previous.runs, ctx.iteration, cap, &merged_span)?;
                        if code == ResultCode::Ok {
                            previous.payload = algorithm.commit()?;
                            committed.push(previous);
                        } else {
                            // The previous segment already committed with Ok;
                            // its payload stays. Only the trailing segment
                            // counts as failed.
                            warn!(%code, span = %merged_span, "Merged re-execution did not succeed");
                            committed.push(previous);
                            failures.push(IovResult::new(span, code));
                            failed = true;
                        }
                    } else if self.params.allow_not_enough_data {
                        warn!(span = %span, "Committing despite NotEnoughData (allowed)");
                        let payload = algorithm.commit()?;
                        committed.push(Commit {
                            start,
                            payload,
                            runs: current,
                        });
                    } else {
                        failures.push(IovResult::new(span, code));
                        failed = true;
                    }
                }
                code => {
                    warn!(%code, span = %span, "Algorithm failed, keeping earlier commits");
                    failures.push(IovResult::new(span, code));
                    failed = true;
                }
            }
            if failed {
                break;
            }
        }

        let mut starts: Vec<ExpRun> = committed.iter().map(|c| c.start).collect();
        let failure_low = failures.last().map(|f| f.iov.low());
        if let Some(low) = failure_low {
            starts.push(low);
        }
        let mut iovs = tile_coverage(&starts, &coverage)?;
        if failure_low.is_some() {
            iovs.pop();
        }

        let payloads = committed
            .into_iter()
            .zip(iovs)
            .map(|(c, iov)| CommittedPayload {
                iov,
                payload: c.payload,
            })
            .collect();

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
