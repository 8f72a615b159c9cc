//! Step-growing sequential strategy.

use caf_domain::{CommittedPayload, ExpRun, Iov, IovResult, Payload, ResultCode};
use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::errors::CafResult;
use crate::strategy::{
    AlgorithmStrategy, Machine, MachineState, StrategyContext, StrategyParams, StrategyReport,
    execute_capped, tile_coverage,
};

/// Walks the collected runs in `step_size` groups, growing the current
/// sub-range while the algorithm reports `NotEnoughData` and committing a
/// payload each time it reports `Ok`.
///
/// A trailing `NotEnoughData` (no more runs to grow into) merges the
/// leftover runs backwards into the previous committed sub-range, which is
/// then re-executed and re-committed over the merged span.
pub struct SequentialRunByRun {
    params: StrategyParams,
}

impl SequentialRunByRun {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

/// A committed sub-range awaiting its final validity interval.
struct Commit {
    start: ExpRun,
    payload: Payload,
    runs: Vec<ExpRun>,
}

impl AlgorithmStrategy for SequentialRunByRun {
    fn name(&self) -> &'static str {
        "SequentialRunByRun"
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

        let chunks = ctx.run_range.chunks(self.params.step_size);
        let total = chunks.len();
        let mut committed: Vec<Commit> = Vec::new();
        let mut failures: Vec<IovResult> = Vec::new();
        let mut current: Vec<ExpRun> = Vec::new();
        let mut failed = false;

        for (i, chunk) in chunks.into_iter().enumerate() {
            current.extend(chunk);
            let span = Iov::from_runs(&current)?;
            let code = execute_capped(algorithm, &current, ctx.iteration, cap, &span)?;
            match code {
                ResultCode::Ok => {
                    let payload = algorithm.commit()?;
                    committed.push(Commit {
                        start: current[0],
                        payload,
                        runs: std::mem::take(&mut current),
                    });
                }
                ResultCode::NotEnoughData if i + 1 < total => {
                    debug!(span = %span, "Not enough data, growing into next step");
                }
                ResultCode::NotEnoughData => {
                    // End of the run list: merge backwards into the last
                    // committed sub-range and redo it over the merged span.
                    if let Some(mut previous) = committed.pop() {
                        debug!(span = %span, "Trailing NotEnoughData, merging into previous commit");
                        previous.runs.append(&mut current);
                        let merged_span = Iov::from_runs(&previous.runs)?;
                        let code =
                            execute_capped(algorithm, &previous.runs, ctx.iteration, cap, &merged_span)?;
                        if code == ResultCode::Ok {
                            previous.payload = algorithm.commit()?;
                            committed.push(previous);
                        } else {
                            // The previous sub-range already committed with
                            // Ok; its payload stays. Only the leftover
                            // trailing span counts as failed.
                            warn!(%code, span = %merged_span, "Merged re-execution did not succeed");
                            committed.push(previous);
                            failures.push(IovResult::new(span, code));
                            failed = true;
                        }
                    } else if self.params.allow_not_enough_data {
                        warn!(span = %span, "Committing despite NotEnoughData (allowed)");
                        let payload = algorithm.commit()?;
                        committed.push(Commit {
                            start: current[0],
                            payload,
                            runs: std::mem::take(&mut current),
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

        // Assign validity intervals. On failure the tiling stops just
        // before the failed span instead of claiming the coverage high.
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

#[cfg(test)]
mod tests {
    use super::*;
    use caf_domain::RunRange;

    use crate::fakes::ScriptedAlgorithm;

    fn run(e: u32, r: u32) -> ExpRun {
        ExpRun::new(e, r)
    }

    fn ctx(low: u32, high: u32, runs: &[u32]) -> StrategyContext {
        StrategyContext {
            iov_coverage: Iov::new(0, low, 0, i64::from(high)).unwrap(),
            run_range: RunRange::new(runs.iter().map(|&r| run(0, r))),
            iteration: 0,
        }
    }

    fn strategy(step_size: usize) -> SequentialRunByRun {
        SequentialRunByRun::new(StrategyParams {
            step_size,
            ..StrategyParams::default()
        })
    }

    #[test]
    fn test_not_enough_data_merges_into_next_step() {
        // Run 3 lacks statistics; it gets absorbed into the sub-range with
        // run 4 and the payloads still tile the full coverage.
        let mut algo = ScriptedAlgorithm::new(
            "T0",
            [
                ResultCode::Ok,
                ResultCode::Ok,
                ResultCode::NotEnoughData,
                ResultCode::Ok,
                ResultCode::Ok,
            ],
        );
        let ctx = ctx(1, 5, &[1, 2, 3, 4, 5]);
        let report = strategy(1).run(&mut algo, &ctx).unwrap();
        assert!(report.is_done());
        let iovs: Vec<Iov> = report.payloads.iter().map(|p| p.iov).collect();
        assert_eq!(
            iovs,
            vec![
                Iov::new(0, 1, 0, 1).unwrap(),
                Iov::new(0, 2, 0, 2).unwrap(),
                Iov::new(0, 3, 0, 4).unwrap(),
                Iov::new(0, 5, 0, 5).unwrap(),
            ]
        );
        // The merged execution saw both runs at once.
        assert_eq!(algo.executed[3], vec![run(0, 3), run(0, 4)]);
    }

    #[test]
    fn test_trailing_not_enough_data_merges_backwards() {
        let mut algo = ScriptedAlgorithm::new(
            "T0",
            [
                ResultCode::Ok,
                ResultCode::Ok,
                ResultCode::NotEnoughData,
                ResultCode::Ok,
            ],
        );
        let ctx = ctx(1, 3, &[1, 2, 3]);
        let report = strategy(1).run(&mut algo, &ctx).unwrap();
        assert!(report.is_done());
        let iovs: Vec<Iov> = report.payloads.iter().map(|p| p.iov).collect();
        assert_eq!(
            iovs,
            vec![Iov::new(0, 1, 0, 1).unwrap(), Iov::new(0, 2, 0, 3).unwrap()]
        );
        // Final execution redid the merged [2, 3] span.
        assert_eq!(algo.executed.last().unwrap(), &vec![run(0, 2), run(0, 3)]);
    }

    #[test]
    fn test_failure_preserves_earlier_commits() {
        let mut algo = ScriptedAlgorithm::new("T0", [ResultCode::Ok, ResultCode::Failure]);
        let ctx = ctx(1, 3, &[1, 2, 3]);
        let report = strategy(1).run(&mut algo, &ctx).unwrap();
        assert_eq!(report.state, MachineState::Failed);
        // Run 1's payload survives; its IoV stops before the failed span.
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(report.payloads[0].iov, Iov::new(0, 1, 0, 1).unwrap());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].iov, Iov::new(0, 2, 0, 2).unwrap());
        // Run 3 was never executed.
        assert_eq!(algo.executed.len(), 2);
    }

    #[test]
    fn test_failed_backward_merge_keeps_prior_commit() {
        // Run 1 commits; run 2 starves and the merged [1, 2] re-execution
        // still starves. Run 1's payload survives with the starved span
        // clipped out of its validity.
        let mut algo = ScriptedAlgorithm::new(
            "T0",
            [
                ResultCode::Ok,
                ResultCode::NotEnoughData,
                ResultCode::NotEnoughData,
            ],
        );
        let ctx = ctx(1, 2, &[1, 2]);
        let report = strategy(1).run(&mut algo, &ctx).unwrap();
        assert_eq!(report.state, MachineState::Failed);
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(report.payloads[0].iov, Iov::new(0, 1, 0, 1).unwrap());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].iov, Iov::new(0, 2, 0, 2).unwrap());
    }

    #[test]
    fn test_first_payload_clamps_to_coverage_low() {
        let mut algo = ScriptedAlgorithm::always_ok("T0");
        // Coverage starts at run 0 but data starts at run 4.
        let ctx = ctx(0, 6, &[4, 5, 6]);
        let report = strategy(3).run(&mut algo, &ctx).unwrap();
        assert!(report.is_done());
        assert_eq!(report.payloads[0].iov, Iov::new(0, 0, 0, 6).unwrap());
    }

    #[test]
    fn test_step_size_groups_runs() {
        let mut algo = ScriptedAlgorithm::always_ok("T0");
        let ctx = ctx(1, 5, &[1, 2, 3, 4, 5]);
        let report = strategy(2).run(&mut algo, &ctx).unwrap();
        assert!(report.is_done());
        assert_eq!(report.payloads.len(), 3);
        assert_eq!(algo.executed[0], vec![run(0, 1), run(0, 2)]);
        assert_eq!(algo.executed[2], vec![run(0, 5)]);
    }

    #[test]
    fn test_empty_run_range_fails() {
        let mut algo = ScriptedAlgorithm::always_ok("T0");
        let ctx = ctx(1, 5, &[]);
        let report = strategy(1).run(&mut algo, &ctx).unwrap();
        assert_eq!(report.state, MachineState::Failed);
        assert!(algo.executed.is_empty());
    }
}
