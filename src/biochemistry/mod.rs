//! Biochemistry module for RBC metabolic kinetics.
//!
//! The network (see [`crate::network`]) says which reactions exist and how
//! they are parameterized. This module turns it into numbers:
//! - `enzyme`: saturating rate primitives shared by every rate law
//! - `ph_sensitivity`: activity multipliers of pH-sensitive enzymes
//! - `ph_transport`: extracellular pH forcing and membrane proton fluxes
//! - `curve_fit`: smooth curves through experimental time courses
//! - `kinetics`: per-metabolite dx/dt for a state vector
//! - `integrator`: adaptive ODE solvers (explicit, BDF, auto switching)
//! - `simulation`: runs, trajectories and failure handling
//! - `bohr`: hemoglobin P50, saturation and O2 delivery from the trajectory
//!
//! Mature RBCs lack mitochondria, so glycolysis is the only ATP source and
//! the Rapoport-Luebering shunt sets 2,3-BPG, which in turn sets O2 affinity.
//!
//! References:
//! - Rapoport TA et al. Eur J Biochem. 1976;69:571-584
//! - Joshi A, Palsson BO. J Theor Biol. 1989;141:515-528
//! - Mulquiney PJ, Kuchel PW. Biochem J. 1999;342:567-580

pub mod bohr;
pub mod curve_fit;
pub mod enzyme;
pub mod integrator;
pub mod kinetics;
pub mod ph_sensitivity;
pub mod ph_transport;
pub mod simulation;

pub use bohr::{oxygen_transport, BohrConstants, OxygenTransport, STANDARD_BPG_MM, STANDARD_PH};
pub use curve_fit::{CurveFit, CurveSet};
pub use enzyme::ReactionStoichiometry;
pub use integrator::{integrate, OdeSystem, SolverMethod, SolverOptions, SolverStats};
pub use kinetics::{FluxEvaluator, KineticsSettings};
pub use ph_sensitivity::{PhSensitivity, PhSensitivityTable};
pub use ph_transport::{PhForcing, Severity, StepResponse, TransportConstants, PHYSIOLOGICAL_PHE, PHYSIOLOGICAL_PHI};
pub use simulation::{simulate, simulate_with_options, FluxSummary, Simulator, Trajectory};
