//! Calibrations and their collections.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use caf_domain::{ExpRun, Iov};

use crate::algorithm::Algorithm;
use crate::strategy::{StrategyKind, StrategyParams};

/// A set of collector inputs sharing one collector command.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    /// Collector executable plus fixed arguments.
    pub cmd: Vec<String>,
    pub input_files: Vec<PathBuf>,
    /// Which runs each input file holds data for.
    pub files_to_iovs: BTreeMap<PathBuf, Iov>,
    /// Upper bound on files handed to one collector job.
    pub max_files_per_job: usize,
    /// Upper bound on jobs; files are re-chunked evenly when exceeded.
    pub max_jobs: usize,
    /// File name each collector job must produce in its output directory.
    pub output_name: String,
}

impl Collection {
    pub fn new(name: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            name: name.into(),
            cmd,
            input_files: Vec::new(),
            files_to_iovs: BTreeMap::new(),
            max_files_per_job: 1,
            max_jobs: 1000,
            output_name: "collector_output.json".to_string(),
        }
    }

    pub fn add_input_file(&mut self, path: impl Into<PathBuf>, iov: Iov) {
        let path = path.into();
        self.input_files.push(path.clone());
        self.files_to_iovs.insert(path, iov);
    }
}

/// An algorithm paired with the strategy that will drive it.
pub struct AlgorithmSetup {
    pub algorithm: Box<dyn Algorithm>,
    pub strategy: StrategyKind,
    pub params: StrategyParams,
}

/// One node of the calibration dependency graph.
pub struct Calibration {
    pub name: String,
    pub collections: Vec<Collection>,
    pub algorithms: Vec<AlgorithmSetup>,
    pub dependencies: BTreeSet<String>,
    /// Runs excluded from collection and from every strategy's run range.
    pub ignored_runs: BTreeSet<ExpRun>,
    pub global_tag: Option<String>,
}

impl Calibration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Vec::new(),
            algorithms: Vec::new(),
            dependencies: BTreeSet::new(),
            ignored_runs: BTreeSet::new(),
            global_tag: None,
        }
    }

    /// Declare that this calibration needs `other`'s payloads first.
    pub fn depends_on(&mut self, other: impl Into<String>) {
        self.dependencies.insert(other.into());
    }

    pub fn add_collection(&mut self, collection: Collection) {
        self.collections.push(collection);
    }

    pub fn add_algorithm(
        &mut self,
        algorithm: Box<dyn Algorithm>,
        strategy: StrategyKind,
        params: StrategyParams,
    ) {
        self.algorithms.push(AlgorithmSetup {
            algorithm,
            strategy,
            params,
        });
    }

    /// Checked by `Caf::add_calibration`; the name doubles as a directory
    /// name so it must be filesystem-safe.
    pub fn is_valid(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name is empty".to_string());
        }
        if self
            .name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(format!("name {:?} is not filesystem-safe", self.name));
        }
        if !self.collections.iter().any(|c| !c.input_files.is_empty()) {
            return Err("no collection with input files".to_string());
        }
        if self.collections.iter().any(|c| c.cmd.is_empty()) {
            return Err("collection with empty collector command".to_string());
        }
        if self.algorithms.is_empty() {
            return Err("no algorithms".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caf_domain::iov::OPEN;

    use crate::fakes::ScriptedAlgorithm;

    fn valid_calibration() -> Calibration {
        let mut cal = Calibration::new("cdc_t0");
        let mut collection = Collection::new("main", vec!["collect".to_string()]);
        collection.add_input_file("/data/r1.root", Iov::new(0, 1, 0, 1).unwrap());
        cal.add_collection(collection);
        cal.add_algorithm(
            Box::new(ScriptedAlgorithm::always_ok("T0")),
            StrategyKind::SingleIov,
            StrategyParams::default(),
        );
        cal
    }

    #[test]
    fn test_valid_calibration() {
        assert!(valid_calibration().is_valid().is_ok());
    }

    #[test]
    fn test_requires_input_files_and_algorithms() {
        let mut no_files = Calibration::new("a");
        no_files.add_collection(Collection::new("main", vec!["collect".to_string()]));
        no_files.add_algorithm(
            Box::new(ScriptedAlgorithm::always_ok("T0")),
            StrategyKind::SingleIov,
            StrategyParams::default(),
        );
        assert!(no_files.is_valid().is_err());

        let mut no_algorithms = valid_calibration();
        no_algorithms.algorithms.clear();
        assert!(no_algorithms.is_valid().is_err());
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let mut cal = valid_calibration();
        cal.name = "cdc/t0".to_string();
        assert!(cal.is_valid().is_err());
        cal.name = "cdc t0".to_string();
        assert!(cal.is_valid().is_err());
    }

    #[test]
    fn test_collection_tracks_file_iovs() {
        let mut collection = Collection::new("main", vec!["collect".to_string()]);
        collection.add_input_file("/data/r1.root", Iov::new(0, 1, 0, OPEN).unwrap());
        assert_eq!(collection.input_files.len(), 1);
        assert!(collection
            .files_to_iovs
            .contains_key(&PathBuf::from("/data/r1.root")));
    }
}
