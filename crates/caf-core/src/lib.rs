//! CAF engine: strategies, backends and the calibration orchestrator.
//!
//! The crate is layered the way a calibration run flows:
//!
//! - [`calibration`] describes what to calibrate (collections, algorithms,
//!   dependencies);
//! - [`backend`] runs collector jobs, locally or on an LSF batch system;
//! - [`strategy`] drives an [`algorithm::Algorithm`] over the collected
//!   runs and decides payload validity;
//! - [`orchestrator`] ties it together across the dependency graph, with
//!   resumable on-disk state through `caf_state`.

pub mod algorithm;
pub mod backend;
pub mod calibration;
pub mod errors;
pub mod fakes;
pub mod job;
pub mod orchestrator;
pub mod strategy;
pub mod telemetry;

pub use algorithm::{Algorithm, CommandAlgorithm};
pub use backend::{Backend, LocalBackend, LsfBackend};
pub use calibration::{AlgorithmSetup, Calibration, Collection};
pub use errors::{CafError, CafResult};
pub use job::{CollectorJob, JobTransition};
pub use orchestrator::{Caf, CafConfig, CafReport, CalibrationOutcome};
pub use strategy::{
    AlgorithmStrategy, MachineState, StrategyContext, StrategyKind, StrategyParams, StrategyReport,
};
