//! Error taxonomy for network loading, integration and calibration.
//!
//! Structural problems (bad network text, bad configuration, misaligned
//! experimental data) are returned as errors and stop the call. Numerical
//! anomalies during a run are recorded instead:
//! - [`NegativeConcentrationWarning`] lives in the trajectory
//! - [`OptimizerNonConvergence`] lives in the calibration result
//!
//! [`IntegrationFailure`] sits in between: it is an error, but it carries the
//! partial trajectory so the calibration engine can score the trial and move on.

use std::fmt;

use serde::Serialize;

use crate::biochemistry::simulation::Trajectory;

/// Errors raised while loading or parameterizing a reaction network
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedNetworkError {
    /// Network file could not be read
    #[error("cannot read network file {path}: {message}")]
    Io { path: String, message: String },

    /// Line could not be parsed
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A reaction, rate law or flux law refers to an unknown metabolite
    #[error("line {line}: undefined metabolite '{name}' referenced by {context}")]
    UndefinedMetabolite {
        line: usize,
        name: String,
        context: String,
    },

    /// Reaction used in one section but never declared in another
    #[error("reaction '{name}' is {problem}")]
    UndefinedReaction { name: String, problem: String },

    /// Same name declared twice
    #[error("line {line}: duplicate declaration of '{name}'")]
    Duplicate { line: usize, name: String },

    /// Declared reversibility disagrees with the written stoichiometry
    #[error("line {line}: reaction '{name}' is declared {declared} but written as {written}")]
    ReversibilityConflict {
        line: usize,
        name: String,
        declared: &'static str,
        written: &'static str,
    },

    /// Stoichiometry has no net effect or cannot be combined
    #[error("reaction '{name}' has inconsistent stoichiometry: {message}")]
    InconsistentStoichiometry { name: String, message: String },

    /// Per-metabolite flux law is invalid
    #[error("line {line}: invalid flux law for '{metabolite}': {message}")]
    InvalidFluxLaw {
        line: usize,
        metabolite: String,
        message: String,
    },

    /// Calibration override does not name a network or transport parameter
    #[error("unknown parameter '{name}' (value {value})")]
    UnknownParameter { name: String, value: f64 },

    /// Parameter value is outside its physical domain
    #[error("parameter '{name}' has invalid value {value}: {message}")]
    InvalidParameter {
        name: String,
        value: f64,
        message: String,
    },
}

/// Integration could not reach the end of the requested time span
///
/// Carries the last accepted state and everything sampled before the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("integration failed at t = {time_h:.4} h with {method}: {reason}")]
pub struct IntegrationFailure {
    /// Time of the last accepted step (hours)
    pub time_h: f64,
    /// State at the last accepted step
    pub last_state: Vec<f64>,
    /// Method that produced the failure (after any stiff retry)
    pub method: String,
    /// Human-readable reason (step size underflow, step budget, ...)
    pub reason: String,
    /// Output points sampled before the failure
    pub partial: Trajectory,
}

/// A metabolite went below zero during a run
///
/// Recorded, never raised and never clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegativeConcentrationWarning {
    /// Metabolite name
    pub metabolite: String,
    /// Time of the accepted step (hours)
    pub time_h: f64,
    /// Offending concentration (mM)
    pub value_mM: f64,
    /// True when the value came from an algebraic conservation law
    pub from_conservation: bool,
}

impl fmt::Display for NegativeConcentrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {:.3e} mM at t = {:.3} h{}",
            self.metabolite,
            self.value_mM,
            self.time_h,
            if self.from_conservation { " (conservation law)" } else { "" }
        )
    }
}

/// Optimizer stopped at its iteration budget without meeting its tolerance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerNonConvergence {
    /// Iterations (generations for the population search) performed
    pub iterations: usize,
    /// Best objective value reached
    pub best_objective: f64,
    /// Backend-specific detail
    pub message: String,
}

/// Experimental data cannot be compared with the simulation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataAlignmentError {
    #[error("no target metabolites given")]
    NoTargets,

    #[error("target metabolite '{0}' is not part of the network")]
    NotInNetwork(String),

    #[error("target metabolite '{0}' has no experimental series")]
    NotInData(String),

    #[error("experimental times for '{metabolite}' ({first_h:.2}-{last_h:.2} h) do not overlap the simulated range 0-{t_max_h:.2} h")]
    NoTimeOverlap {
        metabolite: String,
        first_h: f64,
        last_h: f64,
        t_max_h: f64,
    },
}

/// A polynomial-log curve could not be fitted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveFitError {
    #[error("'{metabolite}' has {points} distinct time points, need at least {required}")]
    TooFewPoints {
        metabolite: String,
        points: usize,
        required: usize,
    },

    #[error("least-squares system for '{0}' is singular")]
    Singular(String),
}

/// Errors from a single `simulate()` call
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Network(#[from] MalformedNetworkError),

    #[error(transparent)]
    Integration(Box<IntegrationFailure>),

    #[error("invalid run configuration: {0}")]
    Config(String),
}

impl From<IntegrationFailure> for SimulationError {
    fn from(failure: IntegrationFailure) -> Self {
        SimulationError::Integration(Box::new(failure))
    }
}

/// Errors that abort a calibration call before any search happens
#[derive(Debug, Clone, thiserror::Error)]
pub enum CalibrationError {
    #[error(transparent)]
    DataAlignment(#[from] DataAlignmentError),

    #[error("parameter '{name}': {message} (initial {initial}, bounds [{lower}, {upper}])")]
    InvalidBounds {
        name: String,
        initial: f64,
        lower: f64,
        upper: f64,
        message: String,
    },

    #[error("invalid calibration configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Network(#[from] MalformedNetworkError),
}
