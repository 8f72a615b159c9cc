//! The simplest strategy: one execution, one payload.

use caf_domain::{CommittedPayload, IovResult, ResultCode};
use tracing::warn;

use crate::algorithm::Algorithm;
use crate::errors::CafResult;
use crate::strategy::{
    AlgorithmStrategy, Machine, MachineState, StrategyContext, StrategyParams, StrategyReport,
    execute_capped,
};

/// Executes once over every collected run and commits a single payload
/// valid for the whole requested coverage.
pub struct SingleIov {
    params: StrategyParams,
}

impl SingleIov {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

impl AlgorithmStrategy for SingleIov {
    fn name(&self) -> &'static str {
        "SingleIOV"
    }

    fn run(
        &mut self,
        algorithm: &mut dyn Algorithm,
        ctx: &StrategyContext,
    ) -> CafResult<StrategyReport> {
        let mut machine = Machine::new(self.name(), algorithm.name());
        machine.to(MachineState::Executing);
        let coverage = ctx.iov_coverage;

        let code = execute_capped(
            algorithm,
            ctx.run_range.runs(),
            ctx.iteration,
            self.params.max_iterations,
            &coverage,
        )?;

        let acceptable = code == ResultCode::Ok
            || (code == ResultCode::NotEnoughData && self.params.allow_not_enough_data);
        if acceptable {
            if code == ResultCode::NotEnoughData {
                warn!(algorithm = %algorithm.name(), "Committing despite NotEnoughData (allowed)");
            }
            let payload = algorithm.commit()?;
            machine.to(MachineState::Done);
            Ok(StrategyReport {
                payloads: vec![CommittedPayload {
                    iov: coverage,
                    payload,
                }],
                failures: Vec::new(),
                state: machine.state(),
            })
        } else {
            warn!(algorithm = %algorithm.name(), %code, iov = %coverage, "Algorithm did not produce a payload");
            machine.to(MachineState::Failed);
            Ok(StrategyReport {
                payloads: Vec::new(),
                failures: vec![IovResult::new(coverage, code)],
                state: machine.state(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caf_domain::iov::OPEN;
    use caf_domain::{ExpRun, Iov, RunRange};

    use crate::fakes::ScriptedAlgorithm;

    fn ctx(runs: &[(u32, u32)]) -> StrategyContext {
        StrategyContext {
            iov_coverage: Iov::new(0, 0, 0, OPEN).unwrap(),
            run_range: RunRange::new(runs.iter().map(|&(e, r)| ExpRun::new(e, r))),
            iteration: 0,
        }
    }

    #[test]
    fn test_single_payload_covers_requested_iov() {
        // Requested coverage starts below the first collected run; the
        // payload must still cover from the coverage edge.
        let mut algo = ScriptedAlgorithm::always_ok("T0");
        let ctx = ctx(&[(0, 3), (0, 4), (0, 7)]);
        let report = SingleIov::new(StrategyParams::default())
            .run(&mut algo, &ctx)
            .unwrap();
        assert!(report.is_done());
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(report.payloads[0].iov, Iov::new(0, 0, 0, OPEN).unwrap());
        // One execute over all collected runs.
        assert_eq!(algo.executed.len(), 1);
        assert_eq!(algo.executed[0].len(), 3);
    }

    #[test]
    fn test_iterate_repeats_in_place_then_commits() {
        let mut algo =
            ScriptedAlgorithm::new("T0", [ResultCode::Iterate, ResultCode::Iterate, ResultCode::Ok]);
        let ctx = ctx(&[(0, 1)]);
        let report = SingleIov::new(StrategyParams::default())
            .run(&mut algo, &ctx)
            .unwrap();
        assert!(report.is_done());
        assert_eq!(algo.executed.len(), 3);
        assert_eq!(algo.commits(), 1);
    }

    #[test]
    fn test_iteration_cap_is_an_error() {
        let mut algo = ScriptedAlgorithm::new("T0", std::iter::repeat(ResultCode::Iterate).take(10));
        let ctx = ctx(&[(0, 1)]);
        let err = SingleIov::new(StrategyParams {
            max_iterations: Some(3),
            ..StrategyParams::default()
        })
        .run(&mut algo, &ctx)
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::CafError::MaxIterationsExceeded { limit: 3, .. }
        ));
    }

    #[test]
    fn test_no_cap_lets_iteration_run_to_completion() {
        // Well past the default cap, but the cap is explicitly disabled.
        let mut algo = ScriptedAlgorithm::new(
            "T0",
            std::iter::repeat(ResultCode::Iterate)
                .take(20)
                .chain([ResultCode::Ok]),
        );
        let ctx = ctx(&[(0, 1)]);
        let report = SingleIov::new(StrategyParams {
            max_iterations: None,
            ..StrategyParams::default()
        })
        .run(&mut algo, &ctx)
        .unwrap();
        assert!(report.is_done());
        assert_eq!(algo.executed.len(), 21);
    }

    #[test]
    fn test_not_enough_data_fails_without_leniency() {
        let mut algo = ScriptedAlgorithm::new("T0", [ResultCode::NotEnoughData]);
        let ctx = ctx(&[(0, 1)]);
        let report = SingleIov::new(StrategyParams::default())
            .run(&mut algo, &ctx)
            .unwrap();
        assert_eq!(report.state, MachineState::Failed);
        assert!(report.payloads.is_empty());
        assert_eq!(report.failures[0].code, ResultCode::NotEnoughData);
    }

    #[test]
    fn test_not_enough_data_commits_when_allowed() {
        let mut algo = ScriptedAlgorithm::new("T0", [ResultCode::NotEnoughData]);
        let ctx = ctx(&[(0, 1)]);
        let report = SingleIov::new(StrategyParams {
            allow_not_enough_data: true,
            ..StrategyParams::default()
        })
        .run(&mut algo, &ctx)
        .unwrap();
        assert!(report.is_done());
        assert_eq!(report.payloads.len(), 1);
    }
}
