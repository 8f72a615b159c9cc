//! Calibration plan files.
//!
//! A plan is a JSON document describing the calibrations to run: their
//! collector commands and input files, the algorithms with their
//! strategies, and the dependency edges. IoVs are written as
//! `[exp_low, run_low, exp_high, run_high]` with `-1` meaning open-ended.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use caf_core::{Calibration, Collection, CommandAlgorithm, StrategyKind, StrategyParams};
use caf_domain::{ExpRun, Iov};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Plan {
    pub calibrations: Vec<CalibrationPlan>,
}

#[derive(Debug, Deserialize)]
pub struct CalibrationPlan {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub collections: Vec<CollectionPlan>,
    pub algorithms: Vec<AlgorithmPlan>,
    /// Runs excluded from collection, as [experiment, run] pairs.
    #[serde(default)]
    pub ignored_runs: Vec<(u32, u32)>,
    #[serde(default)]
    pub global_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionPlan {
    pub name: String,
    pub cmd: Vec<String>,
    /// Input file path -> the IoV its data covers.
    #[serde(default)]
    pub input_files: BTreeMap<PathBuf, [i64; 4]>,
    #[serde(default = "default_max_files_per_job")]
    pub max_files_per_job: usize,
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    #[serde(default)]
    pub output_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmPlan {
    pub name: String,
    pub cmd: Vec<String>,
    pub strategy: StrategyKind,
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    /// Iterate cap. Absent uses the engine default; an explicit `null`
    /// removes the cap.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub allow_not_enough_data: bool,
    #[serde(default)]
    pub payload_boundaries: Vec<(u32, u32)>,
    #[serde(default)]
    pub expert: BTreeMap<String, serde_json::Value>,
}

fn default_max_files_per_job() -> usize {
    1
}

fn default_max_jobs() -> usize {
    1000
}

fn default_step_size() -> usize {
    1
}

fn default_max_iterations() -> Option<u32> {
    Some(caf_core::strategy::DEFAULT_MAX_ITERATIONS)
}

pub fn load(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid plan JSON in {:?}", path))
}

fn iov_from_bounds(bounds: [i64; 4]) -> Result<Iov> {
    let [exp_low, run_low, exp_high, run_high] = bounds;
    if exp_low < 0 || run_low < 0 {
        bail!("IoV low bound must be concrete, got {bounds:?}");
    }
    Iov::new(exp_low as u32, run_low as u32, exp_high, run_high)
        .with_context(|| format!("Invalid IoV {bounds:?}"))
}

/// Turn a parsed plan into engine calibrations.
///
/// Algorithm working directories are created under
/// `<work_root>/<calibration>/algorithms/<name>`.
pub fn build_calibrations(plan: Plan, work_root: &Path) -> Result<Vec<Calibration>> {
    let mut calibrations = Vec::with_capacity(plan.calibrations.len());
    for cal_plan in plan.calibrations {
        let mut cal = Calibration::new(&cal_plan.name);
        for dep in cal_plan.depends_on {
            cal.depends_on(dep);
        }
        for (experiment, run) in cal_plan.ignored_runs {
            cal.ignored_runs.insert(ExpRun::new(experiment, run));
        }
        cal.global_tag = cal_plan.global_tag;

        for collection_plan in cal_plan.collections {
            if collection_plan.cmd.is_empty() {
                bail!(
                    "Collection {} of {} has an empty command",
                    collection_plan.name,
                    cal_plan.name
                );
            }
            let mut collection = Collection::new(&collection_plan.name, collection_plan.cmd);
            collection.max_files_per_job = collection_plan.max_files_per_job;
            collection.max_jobs = collection_plan.max_jobs;
            if let Some(output_name) = collection_plan.output_name {
                collection.output_name = output_name;
            }
            for (file, bounds) in collection_plan.input_files {
                let iov = iov_from_bounds(bounds)
                    .with_context(|| format!("Input file {:?} of {}", file, cal_plan.name))?;
                collection.add_input_file(file, iov);
            }
            cal.add_collection(collection);
        }

        for algorithm_plan in cal_plan.algorithms {
            if algorithm_plan.cmd.is_empty() {
                bail!(
                    "Algorithm {} of {} has an empty command",
                    algorithm_plan.name,
                    cal_plan.name
                );
            }
            let params = StrategyParams {
                step_size: algorithm_plan.step_size,
                max_iterations: algorithm_plan.max_iterations,
                allow_not_enough_data: algorithm_plan.allow_not_enough_data,
                payload_boundaries: algorithm_plan
                    .payload_boundaries
                    .into_iter()
                    .map(|(e, r)| ExpRun::new(e, r))
                    .collect(),
                expert: algorithm_plan.expert,
            };
            let work_dir = work_root
                .join(&cal_plan.name)
                .join("algorithms")
                .join(&algorithm_plan.name);
            std::fs::create_dir_all(&work_dir)
                .with_context(|| format!("Failed to create {:?}", work_dir))?;
            cal.add_algorithm(
                Box::new(CommandAlgorithm::new(
                    &algorithm_plan.name,
                    algorithm_plan.cmd,
                    work_dir,
                )),
                algorithm_plan.strategy,
                params,
            );
        }
        calibrations.push(cal);
    }
    Ok(calibrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
      "calibrations": [
        {
          "name": "cdc_t0",
          "collections": [
            {
              "name": "main",
              "cmd": ["cdc-collector", "--fast"],
              "input_files": {
                "/data/r1.root": [0, 1, 0, 1],
                "/data/r2.root": [0, 2, 0, 2]
              },
              "max_files_per_job": 2
            }
          ],
          "algorithms": [
            {
              "name": "T0Algorithm",
              "cmd": ["cdc-t0-algo"],
              "strategy": "sequential_run_by_run",
              "step_size": 2
            }
          ],
          "ignored_runs": [[0, 2]],
          "global_tag": "main_2026"
        },
        {
          "name": "cdc_tw",
          "depends_on": ["cdc_t0"],
          "collections": [
            {
              "name": "main",
              "cmd": ["cdc-collector"],
              "input_files": { "/data/r1.root": [0, 1, 0, -1] }
            }
          ],
          "algorithms": [
            {
              "name": "TimeWalk",
              "cmd": ["cdc-tw-algo"],
              "strategy": "single_iov"
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn test_parse_and_build_example_plan() {
        let dir = tempfile::tempdir().unwrap();
        let plan: Plan = serde_json::from_str(EXAMPLE).unwrap();
        let calibrations = build_calibrations(plan, dir.path()).unwrap();
        assert_eq!(calibrations.len(), 2);

        let cdc_t0 = &calibrations[0];
        assert_eq!(cdc_t0.name, "cdc_t0");
        assert!(cdc_t0.is_valid().is_ok());
        assert_eq!(cdc_t0.collections[0].max_files_per_job, 2);
        assert!(cdc_t0.ignored_runs.contains(&ExpRun::new(0, 2)));
        assert_eq!(cdc_t0.global_tag.as_deref(), Some("main_2026"));

        let cdc_tw = &calibrations[1];
        assert!(cdc_tw.dependencies.contains("cdc_t0"));
        assert_eq!(
            cdc_tw.collections[0].files_to_iovs[&PathBuf::from("/data/r1.root")],
            Iov::new(0, 1, 0, -1).unwrap()
        );

        // Algorithm work directories exist.
        assert!(dir.path().join("cdc_t0/algorithms/T0Algorithm").is_dir());
    }

    #[test]
    fn test_max_iterations_absent_defaults_and_null_uncaps() {
        let capped: AlgorithmPlan = serde_json::from_str(
            r#"{"name": "A", "cmd": ["algo"], "strategy": "single_iov"}"#,
        )
        .unwrap();
        assert_eq!(
            capped.max_iterations,
            Some(caf_core::strategy::DEFAULT_MAX_ITERATIONS)
        );

        let uncapped: AlgorithmPlan = serde_json::from_str(
            r#"{"name": "A", "cmd": ["algo"], "strategy": "single_iov", "max_iterations": null}"#,
        )
        .unwrap();
        assert_eq!(uncapped.max_iterations, None);
    }

    #[test]
    fn test_rejects_negative_low_bound() {
        assert!(iov_from_bounds([-1, 0, 0, 0]).is_err());
        assert!(iov_from_bounds([0, 0, -1, -1]).is_ok());
    }
}
