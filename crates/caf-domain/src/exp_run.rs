//! The (experiment, run) pair.

use serde::{Deserialize, Serialize};

/// A single run of data-taking, identified by experiment and run number.
///
/// Totally ordered by (experiment, run); experiments partition runs into
/// eras, so comparing across experiments is always lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpRun {
    pub experiment: u32,
    pub run: u32,
}

impl ExpRun {
    pub fn new(experiment: u32, run: u32) -> Self {
        Self { experiment, run }
    }

    /// The run immediately before this one, if any.
    ///
    /// Crossing an experiment boundary has no well-defined predecessor run
    /// number, so `(e, 0)` has no predecessor.
    pub fn predecessor(&self) -> Option<ExpRun> {
        if self.run > 0 {
            Some(ExpRun::new(self.experiment, self.run - 1))
        } else {
            None
        }
    }
}

impl From<(u32, u32)> for ExpRun {
    fn from((experiment, run): (u32, u32)) -> Self {
        ExpRun { experiment, run }
    }
}

impl std::fmt::Display for ExpRun {
    // "exp.run", the form used in job names and log lines.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.experiment, self.run)
    }
}
