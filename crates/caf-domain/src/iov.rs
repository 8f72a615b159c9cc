//! Intervals of validity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::exp_run::ExpRun;

/// Sentinel for an open-ended high bound.
pub const OPEN: i64 = -1;

/// An interval of validity: the closed (or right-open-ended) range of
/// (experiment, run) pairs over which a payload is considered valid.
///
/// The low bound is always concrete. In the high bound, `exp_high == -1`
/// means "valid forever" and `run_high == -1` with a concrete `exp_high`
/// means "to the end of that experiment".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iov {
    pub exp_low: u32,
    pub run_low: u32,
    pub exp_high: i64,
    pub run_high: i64,
}

impl Iov {
    /// Build an IoV, rejecting a closed low bound above a closed high bound.
    pub fn new(exp_low: u32, run_low: u32, exp_high: i64, run_high: i64) -> Result<Self> {
        let iov = Self {
            exp_low,
            run_low,
            exp_high,
            run_high,
        };
        if iov.exp_high != OPEN {
            let high_exp = iov.exp_high as u32;
            let closed_low_above = high_exp < exp_low
                || (high_exp == exp_low && iov.run_high != OPEN && (iov.run_high as u32) < run_low);
            if closed_low_above {
                return Err(DomainError::InvalidIov {
                    exp_low,
                    run_low,
                    exp_high,
                    run_high,
                });
            }
        }
        Ok(iov)
    }

    /// An IoV valid from the given run until forever.
    pub fn open_ended(exp_low: u32, run_low: u32) -> Self {
        Self {
            exp_low,
            run_low,
            exp_high: OPEN,
            run_high: OPEN,
        }
    }

    /// Build the smallest IoV spanning a non-empty, sorted run list.
    pub fn from_runs(runs: &[ExpRun]) -> Result<Self> {
        let first = runs.first().ok_or(DomainError::EmptyRunList)?;
        let last = runs.last().ok_or(DomainError::EmptyRunList)?;
        Iov::new(
            first.experiment,
            first.run,
            last.experiment as i64,
            last.run as i64,
        )
    }

    pub fn low(&self) -> ExpRun {
        ExpRun::new(self.exp_low, self.run_low)
    }

    /// The high bound, or `None` when valid forever.
    ///
    /// A concrete experiment with an open run bound reports the experiment
    /// with `u32::MAX` as the run so callers can still compare against it.
    pub fn high(&self) -> Option<ExpRun> {
        if self.exp_high == OPEN {
            None
        } else if self.run_high == OPEN {
            Some(ExpRun::new(self.exp_high as u32, u32::MAX))
        } else {
            Some(ExpRun::new(self.exp_high as u32, self.run_high as u32))
        }
    }

    /// True iff `run` falls inside this interval, treating open high
    /// bounds as +infinity.
    pub fn contains(&self, run: ExpRun) -> bool {
        if run < self.low() {
            return false;
        }
        match self.high() {
            None => true,
            Some(high) => run <= high,
        }
    }

    /// Standard interval overlap on the (experiment, run) lexicographic order.
    pub fn overlaps(&self, other: &Iov) -> bool {
        let self_reaches_other = match self.high() {
            None => true,
            Some(high) => other.low() <= high,
        };
        let other_reaches_self = match other.high() {
            None => true,
            Some(high) => self.low() <= high,
        };
        self_reaches_other && other_reaches_self
    }

    /// Join with another IoV. Only contiguous or overlapping intervals can
    /// be joined; disjoint ones would silently claim validity for runs
    /// neither covers.
    pub fn union(&self, other: &Iov) -> Result<Iov> {
        let (first, second) = if self.low() <= other.low() {
            (self, other)
        } else {
            (other, self)
        };
        // Contiguity across an experiment boundary requires the first
        // interval to run to the end of the previous experiment.
        let contiguous = match first.high() {
            None => true,
            Some(high) => {
                first.overlaps(second)
                    || second
                        .low()
                        .predecessor()
                        .map(|p| p <= high)
                        .unwrap_or(
                            high.run == u32::MAX
                                && high.experiment.checked_add(1)
                                    == Some(second.low().experiment),
                        )
            }
        };
        if !contiguous {
            return Err(DomainError::NonContiguousUnion(
                first.to_string(),
                second.to_string(),
            ));
        }
        let (exp_high, run_high) = match (first.high(), second.high()) {
            (None, _) | (_, None) => (OPEN, OPEN),
            (Some(a), Some(b)) => {
                let hi = a.max(b);
                let run = if hi.run == u32::MAX { OPEN } else { hi.run as i64 };
                (hi.experiment as i64, run)
            }
        };
        Iov::new(first.exp_low, first.run_low, exp_high, run_high)
    }
}

impl std::fmt::Display for Iov {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}.{}, {}.{}]",
            self.exp_low, self.run_low, self.exp_high, self.run_high
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(e: u32, r: u32) -> ExpRun {
        ExpRun::new(e, r)
    }

    #[test]
    fn test_invalid_low_above_high() {
        assert!(Iov::new(1, 10, 1, 5).is_err());
        assert!(Iov::new(2, 0, 1, 99).is_err());
    }

    #[test]
    fn test_open_ended_highs_are_valid() {
        assert!(Iov::new(1, 10, OPEN, OPEN).is_ok());
        assert!(Iov::new(1, 10, 1, OPEN).is_ok());
    }

    #[test]
    fn test_contains_closed() {
        let iov = Iov::new(0, 5, 0, 10).unwrap();
        assert!(iov.contains(run(0, 5)));
        assert!(iov.contains(run(0, 10)));
        assert!(!iov.contains(run(0, 4)));
        assert!(!iov.contains(run(0, 11)));
        assert!(!iov.contains(run(1, 7)));
    }

    #[test]
    fn test_contains_open_ended() {
        let forever = Iov::open_ended(1, 3);
        assert!(forever.contains(run(1, 3)));
        assert!(forever.contains(run(99, 0)));
        assert!(!forever.contains(run(1, 2)));

        let to_end_of_exp = Iov::new(1, 0, 1, OPEN).unwrap();
        assert!(to_end_of_exp.contains(run(1, 123456)));
        assert!(!to_end_of_exp.contains(run(2, 0)));
    }

    #[test]
    fn test_contains_is_pure() {
        let iov = Iov::new(0, 1, 0, 15).unwrap();
        let r = run(0, 7);
        assert_eq!(iov.contains(r), iov.contains(r));
    }

    #[test]
    fn test_overlaps() {
        let a = Iov::new(0, 1, 0, 10).unwrap();
        let b = Iov::new(0, 10, 0, 20).unwrap();
        let c = Iov::new(0, 11, 0, 20).unwrap();
        let open = Iov::open_ended(0, 15);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(open.overlaps(&c));
        assert!(!open.overlaps(&a));
    }

    #[test]
    fn test_from_runs() {
        let runs = vec![run(0, 3), run(0, 4), run(1, 0)];
        let iov = Iov::from_runs(&runs).unwrap();
        assert_eq!(iov, Iov::new(0, 3, 1, 0).unwrap());
        assert!(Iov::from_runs(&[]).is_err());
    }

    #[test]
    fn test_union_contiguous() {
        let a = Iov::new(0, 1, 0, 5).unwrap();
        let b = Iov::new(0, 6, 0, 10).unwrap();
        assert_eq!(a.union(&b).unwrap(), Iov::new(0, 1, 0, 10).unwrap());

        let gap = Iov::new(0, 8, 0, 10).unwrap();
        assert!(a.union(&gap).is_err());
    }

    #[test]
    fn test_union_at_experiment_boundary() {
        // Contiguity across experiments: the first interval must run to
        // the end of the previous experiment.
        let a = Iov::new(1, 0, 1, OPEN).unwrap();
        let b = Iov::new(2, 0, 2, 5).unwrap();
        assert_eq!(a.union(&b).unwrap(), Iov::new(1, 0, 2, 5).unwrap());

        // No panic when the first interval sits in the last representable
        // experiment.
        let last = Iov::new(u32::MAX, 0, i64::from(u32::MAX), OPEN).unwrap();
        let tail = Iov::new(u32::MAX, 7, i64::from(u32::MAX), OPEN).unwrap();
        assert_eq!(last.union(&tail).unwrap(), last);
    }

    #[test]
    fn test_union_with_open_end() {
        let a = Iov::new(0, 1, 0, 5).unwrap();
        let b = Iov::open_ended(0, 6);
        let joined = a.union(&b).unwrap();
        assert_eq!(joined, Iov::open_ended(0, 1));
    }
}
