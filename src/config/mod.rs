//! Configuration for simulation runs and calibration calls.

mod parameters;

pub use parameters::{CalibrationConfig, ConfigError, Parameters, PerturbationKind, RunConfig};
