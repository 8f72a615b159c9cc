//! Ordered, deduplicated sets of runs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::exp_run::ExpRun;
use crate::iov::Iov;

/// The set of runs for which collected data exists.
///
/// Always sorted and deduplicated. All operations return new values; a
/// `RunRange` is never mutated in place, which is what lets the ignored-run
/// subtraction and the strategy partitioning share one collected view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRange {
    runs: Vec<ExpRun>,
}

impl RunRange {
    pub fn new(runs: impl IntoIterator<Item = ExpRun>) -> Self {
        let set: BTreeSet<ExpRun> = runs.into_iter().collect();
        Self {
            runs: set.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn first(&self) -> Option<ExpRun> {
        self.runs.first().copied()
    }

    pub fn last(&self) -> Option<ExpRun> {
        self.runs.last().copied()
    }

    pub fn runs(&self) -> &[ExpRun] {
        &self.runs
    }

    pub fn iter(&self) -> impl Iterator<Item = ExpRun> + '_ {
        self.runs.iter().copied()
    }

    pub fn contains(&self, run: ExpRun) -> bool {
        self.runs.binary_search(&run).is_ok()
    }

    /// A new range with the ignored runs removed.
    pub fn subtract(&self, ignored: &BTreeSet<ExpRun>) -> RunRange {
        RunRange {
            runs: self
                .runs
                .iter()
                .copied()
                .filter(|r| !ignored.contains(r))
                .collect(),
        }
    }

    /// A new range keeping only runs inside the given IoV.
    pub fn restrict_to(&self, iov: &Iov) -> RunRange {
        RunRange {
            runs: self
                .runs
                .iter()
                .copied()
                .filter(|r| iov.contains(*r))
                .collect(),
        }
    }

    /// Split the sorted run sequence into consecutive groups of
    /// `chunk_size` runs; the last group may be smaller. Used by the
    /// step-growing strategies.
    pub fn chunks(&self, chunk_size: usize) -> Vec<Vec<ExpRun>> {
        assert!(chunk_size > 0, "chunk_size must be positive");
        self.runs
            .chunks(chunk_size)
            .map(|c| c.to_vec())
            .collect()
    }

    /// Split into maximal sub-ranges of consecutive run numbers within one
    /// experiment.
    pub fn contiguous_ranges(&self) -> Vec<RunRange> {
        let mut out: Vec<Vec<ExpRun>> = Vec::new();
        for run in &self.runs {
            let follows_previous = out
                .last()
                .and_then(|current| current.last())
                .map(|prev| prev.experiment == run.experiment && prev.run + 1 == run.run)
                .unwrap_or(false);
            if follows_previous {
                out.last_mut().unwrap().push(*run);
            } else {
                out.push(vec![*run]);
            }
        }
        out.into_iter().map(|runs| RunRange { runs }).collect()
    }
}

impl FromIterator<ExpRun> for RunRange {
    fn from_iter<T: IntoIterator<Item = ExpRun>>(iter: T) -> Self {
        RunRange::new(iter)
    }
}
