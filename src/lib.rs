//! RBC Kinetics - red blood cell metabolic kinetics engine
//!
//! Simulates the metabolic network of a human red blood cell (glycolysis,
//! pentose phosphate pathway, glutathione redox, nucleotide salvage and the
//! Rapoport-Luebering shunt) with intracellular pH dynamics, derives oxygen
//! transport through the Bohr effect, and calibrates kinetic parameters
//! against experimental time courses.

// Allow non-snake-case for unit suffixes in field names (mM, mmHg, etc.)
// This follows the project convention of including units in names.
#![allow(non_snake_case)]

pub mod biochemistry;
pub mod calibration;
pub mod config;
pub mod error;
pub mod experimental;
pub mod export;
pub mod network;

pub use biochemistry::{
    oxygen_transport, simulate, simulate_with_options, BohrConstants, OxygenTransport, PhForcing, Severity,
    Simulator, SolverMethod, Trajectory,
};
pub use calibration::{calibrate, CalibrationMethod, CalibrationResult, Model, ParameterSet};
pub use config::{CalibrationConfig, Parameters, RunConfig};
pub use error::{CalibrationError, IntegrationFailure, MalformedNetworkError, SimulationError};
pub use experimental::ExperimentalData;
pub use network::Network;
