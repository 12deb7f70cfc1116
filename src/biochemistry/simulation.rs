//! Simulation entry point.
//!
//! [`Simulator`] owns everything a run needs that does not change between
//! calibration trials: the network, the fitted curves, the pH-sensitivity
//! table, the run configuration and the initial state. Each run builds its
//! own [`FluxEvaluator`], so trials with different parameter overrides can
//! run in parallel against one shared simulator.
//!
//! A run integrates the full state (metabolites then pHi), writes the
//! conservation-law metabolites back after every accepted step, records
//! negative concentrations without clamping them, and evaluates the oxygen
//! metrics at every output point.

use std::borrow::Cow;
use std::sync::Arc;

use serde::Serialize;

use crate::biochemistry::bohr::{oxygen_transport, BohrConstants, OxygenTransport, STANDARD_BPG_MM};
use crate::biochemistry::curve_fit::CurveSet;
use crate::biochemistry::integrator::{integrate, OdeSystem, SolverStats};
use crate::biochemistry::kinetics::FluxEvaluator;
use crate::biochemistry::ph_sensitivity::PhSensitivityTable;
use crate::biochemistry::ph_transport::{step_response, StepResponse};
use crate::config::RunConfig;
use crate::error::{IntegrationFailure, MalformedNetworkError, NegativeConcentrationWarning, SimulationError};
use crate::experimental::ExperimentalData;
use crate::network::Network;

/// Values above this are solver round-off, not negative concentrations (mM)
pub const NEGATIVE_TOLERANCE_MM: f64 = 1e-9;

/// Name of the metabolite that sets P50 alongside pH
const BPG_METABOLITE: &str = "B23PG";

/// Output of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trajectory {
    /// Metabolite names in state order, then "pHi"
    pub state_names: Vec<String>,
    pub times_h: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    /// Oxygen metrics at each output time
    pub derived: Vec<OxygenTransport>,
    pub warnings: Vec<NegativeConcentrationWarning>,
    pub stats: SolverStats,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times_h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_h.is_empty()
    }

    /// State components per output point
    pub fn n_state(&self) -> usize {
        self.state_names.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.state_names.iter().position(|n| n == name)
    }

    /// Values of one state component over time
    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        let i = self.index_of(name)?;
        Some(self.states.iter().map(|s| s[i]).collect())
    }

    pub fn ph_i(&self) -> Vec<f64> {
        self.derived.iter().map(|d| d.ph_i).collect()
    }

    pub fn ph_e(&self) -> Vec<f64> {
        self.derived.iter().map(|d| d.ph_e).collect()
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    /// Linear interpolation of component `index` at `t_h`; `None` outside the run
    pub fn value_at(&self, index: usize, t_h: f64) -> Option<f64> {
        let first = *self.times_h.first()?;
        let last = *self.times_h.last()?;
        if t_h < first - 1e-9 || t_h > last + 1e-9 {
            return None;
        }
        let k = self.times_h.partition_point(|&t| t < t_h);
        if k == 0 {
            return self.states[0].get(index).copied();
        }
        if k >= self.times_h.len() {
            return self.states[self.times_h.len() - 1].get(index).copied();
        }
        let (t0, t1) = (self.times_h[k - 1], self.times_h[k]);
        let (y0, y1) = (*self.states[k - 1].get(index)?, *self.states[k].get(index)?);
        let w = if t1 > t0 { (t_h - t0) / (t1 - t0) } else { 1.0 };
        Some(y0 + w * (y1 - y0))
    }

    /// pHi lag and equilibrium after a perturbation starting at `start_h`
    pub fn ph_step_response(&self, start_h: f64) -> Option<StepResponse> {
        step_response(&self.times_h, &self.ph_i(), &self.ph_e(), start_h)
    }
}

/// Mean, minimum and maximum of one reaction rate over a trajectory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FluxSummary {
    pub reaction: String,
    pub mean_mM_per_h: f64,
    pub min_mM_per_h: f64,
    pub max_mM_per_h: f64,
}

/// The RBC model as an ODE system with its accepted-step bookkeeping
struct RbcSystem<'a> {
    evaluator: FluxEvaluator<'a>,
    names: Vec<String>,
    algebraic: Vec<bool>,
    warnings: Vec<NegativeConcentrationWarning>,
    /// Per metabolite: warning of the excursion below zero in progress
    open_excursion: Vec<Option<usize>>,
}

impl<'a> RbcSystem<'a> {
    fn new(evaluator: FluxEvaluator<'a>) -> Self {
        let network = evaluator.network();
        let n = network.n_metabolites();
        let mut algebraic = vec![false; n];
        for pool in evaluator.pools() {
            algebraic[pool.metabolite] = true;
        }
        Self {
            names: network.metabolites().iter().map(|m| m.name.clone()).collect(),
            algebraic,
            warnings: Vec::new(),
            open_excursion: vec![None; n],
            evaluator,
        }
    }

    fn record_negatives(&mut self, t_h: f64, x: &[f64]) {
        for (i, &value) in x.iter().take(self.names.len()).enumerate() {
            if value >= -NEGATIVE_TOLERANCE_MM {
                self.open_excursion[i] = None;
                continue;
            }
            match self.open_excursion[i] {
                Some(w) => {
                    if value < self.warnings[w].value_mM {
                        self.warnings[w].value_mM = value;
                        self.warnings[w].time_h = t_h;
                    }
                }
                None => {
                    log::warn!("{} went negative at t = {:.3} h: {:.3e} mM", self.names[i], t_h, value);
                    self.open_excursion[i] = Some(self.warnings.len());
                    self.warnings.push(NegativeConcentrationWarning {
                        metabolite: self.names[i].clone(),
                        time_h: t_h,
                        value_mM: value,
                        from_conservation: self.algebraic[i],
                    });
                }
            }
        }
    }
}

impl OdeSystem for RbcSystem<'_> {
    fn dimension(&self) -> usize {
        self.evaluator.network().n_state()
    }

    fn rhs(&mut self, t_h: f64, x: &[f64], dxdt: &mut [f64]) {
        self.evaluator.derivatives(t_h, x, dxdt);
    }

    fn is_algebraic(&self, i: usize) -> bool {
        self.algebraic.get(i).copied().unwrap_or(false)
    }

    fn on_accepted_step(&mut self, t_h: f64, x: &mut [f64]) {
        self.evaluator.resolve_conservation(x);
        self.record_negatives(t_h, x);
    }

    fn on_restart(&mut self) {
        self.warnings.clear();
        self.open_excursion.iter_mut().for_each(|w| *w = None);
    }
}

/// Shared, read-only setup of a family of runs
#[derive(Debug, Clone)]
pub struct Simulator {
    network: Arc<Network>,
    curves: Arc<CurveSet>,
    ph_table: Arc<PhSensitivityTable>,
    config: RunConfig,
    x0: Vec<f64>,
}

impl Simulator {
    /// Validate the configuration, fit curves to `data` and fix the initial state
    pub fn new(
        network: impl Into<Arc<Network>>,
        config: RunConfig,
        data: Option<&ExperimentalData>,
    ) -> Result<Self, SimulationError> {
        config.validate().map_err(|e| SimulationError::Config(e.to_string()))?;
        let network = network.into();
        let curves = match data {
            Some(data) => CurveSet::fit(&network, data),
            None => CurveSet::empty(network.n_metabolites()),
        };
        let mut x0 = network.initial_state();
        if config.experimental_initial_conditions {
            curves.apply_initial_conditions(&mut x0);
        }
        let ph_table = PhSensitivityTable::default().with_activity_clip(config.activity_clip);

        Ok(Self {
            network,
            curves: Arc::new(curves),
            ph_table: Arc::new(ph_table),
            config,
            x0,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn curves(&self) -> &CurveSet {
        &self.curves
    }

    pub fn initial_state(&self) -> &[f64] {
        &self.x0
    }

    /// Run with the configured parameters
    pub fn run(&self) -> Result<Trajectory, SimulationError> {
        self.run_with(&[])
    }

    /// Run with parameter overrides
    ///
    /// Names are `vmax_<RXN>`, `km_<MET>`, the transport constants
    /// (`K_DIFF_H`, `K_NHE`, `K_AE1`, `BETA_BUFFER`) and `curve_fit_strength`.
    pub fn run_with(&self, overrides: &[(&str, f64)]) -> Result<Trajectory, SimulationError> {
        let mut settings = self
            .config
            .kinetics_settings()
            .map_err(|e| SimulationError::Config(e.to_string()))?;
        let mut network = Cow::Borrowed(self.network.as_ref());

        for &(name, value) in overrides {
            let invalid = |message: &str| MalformedNetworkError::InvalidParameter {
                name: name.to_string(),
                value,
                message: message.to_string(),
            };
            if name == "curve_fit_strength" {
                if !(0.0..=1.0).contains(&value) {
                    return Err(invalid("curve_fit_strength must lie in [0, 1]").into());
                }
                settings.curve_fit_strength = value;
            } else if settings.transport.get(name).is_some() {
                settings.transport.set(name, value);
                settings.transport.validate().map_err(|e| invalid(&e))?;
            } else {
                network.to_mut().set_parameter(name, value)?;
            }
        }

        let evaluator = FluxEvaluator::new(&network, &self.curves, &self.ph_table, settings, &self.x0);
        let mut system = RbcSystem::new(evaluator);
        let options = self.config.solver_options();
        let span = (0.0, self.config.t_max_h);

        log::debug!(
            "Simulating 0-{:.1} h with {} (β = {:.2}, {} overrides)",
            span.1,
            self.config.method,
            system.evaluator.settings().curve_fit_strength,
            overrides.len()
        );

        match integrate(&mut system, &self.x0, span, self.config.method, &options) {
            Ok(solution) => {
                log::debug!(
                    "Run finished: {} accepted, {} rejected steps, {} RHS evaluations",
                    solution.stats.accepted_steps,
                    solution.stats.rejected_steps,
                    solution.stats.rhs_evaluations
                );
                Ok(assemble(&system, &self.config.bohr, solution.times_h, solution.states, solution.stats))
            }
            Err(failure) => {
                let partial = assemble(&system, &self.config.bohr, failure.times_h, failure.states, failure.stats);
                Err(IntegrationFailure {
                    time_h: failure.time_h,
                    last_state: failure.last_state,
                    method: failure.method.to_string(),
                    reason: failure.reason,
                    partial,
                }
                .into())
            }
        }
    }

    /// Mean, minimum and maximum of every reaction rate over the output points
    pub fn flux_summary(&self, trajectory: &Trajectory) -> Result<Vec<FluxSummary>, SimulationError> {
        let settings = self
            .config
            .kinetics_settings()
            .map_err(|e| SimulationError::Config(e.to_string()))?;
        let mut evaluator = FluxEvaluator::new(&self.network, &self.curves, &self.ph_table, settings, &self.x0);
        let n_reactions = self.network.reactions().len();
        let mut sum = vec![0.0; n_reactions];
        let mut min = vec![f64::INFINITY; n_reactions];
        let mut max = vec![f64::NEG_INFINITY; n_reactions];

        for state in &trajectory.states {
            for (r, v) in evaluator.reaction_rates(state).into_iter().enumerate() {
                sum[r] += v;
                min[r] = min[r].min(v);
                max[r] = max[r].max(v);
            }
        }

        let n = trajectory.len().max(1) as f64;
        Ok(self
            .network
            .reactions()
            .iter()
            .enumerate()
            .map(|(r, reaction)| FluxSummary {
                reaction: reaction.name.clone(),
                mean_mM_per_h: sum[r] / n,
                min_mM_per_h: min[r],
                max_mM_per_h: max[r],
            })
            .collect())
    }
}

/// Resolve conservation on the sampled states and attach the oxygen metrics
fn assemble(
    system: &RbcSystem<'_>,
    bohr: &BohrConstants,
    times_h: Vec<f64>,
    mut states: Vec<Vec<f64>>,
    stats: SolverStats,
) -> Trajectory {
    let evaluator = &system.evaluator;
    let network = evaluator.network();
    let ph_index = network.ph_index();
    let bpg_index = network.metabolite_index(BPG_METABOLITE);

    let mut derived = Vec::with_capacity(states.len());
    for (t, x) in times_h.iter().zip(states.iter_mut()) {
        evaluator.resolve_conservation(x);
        let bpg = bpg_index.map_or(STANDARD_BPG_MM, |i| x[i]);
        derived.push(oxygen_transport(x[ph_index], evaluator.ph_e(*t), bpg, bohr));
    }

    Trajectory {
        state_names: (0..network.n_state()).map(|i| network.state_name(i).to_string()).collect(),
        times_h,
        states,
        derived,
        warnings: system.warnings.clone(),
        stats,
    }
}

/// Run the network once with `config`
pub fn simulate(
    network: &Network,
    config: &RunConfig,
    data: Option<&ExperimentalData>,
) -> Result<Trajectory, SimulationError> {
    let simulator = Simulator::new(network.clone(), config.clone(), data)?;
    log::info!(
        "Simulating {} metabolites over {:.1} h ({})",
        network.n_metabolites(),
        config.t_max_h,
        config.forcing().map(|f| f.to_string()).unwrap_or_default()
    );
    let trajectory = simulator.run()?;
    log::info!(
        "Simulation complete: {} points, {} steps, {} negative-concentration warnings",
        trajectory.len(),
        trajectory.stats.accepted_steps,
        trajectory.warnings.len()
    );
    Ok(trajectory)
}

/// Run the network with a flat set of named options
pub fn simulate_with_options<I, K, V>(
    network: &Network,
    options: I,
    data: Option<&ExperimentalData>,
) -> Result<Trajectory, SimulationError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let config = RunConfig::from_options(options).map_err(|e| SimulationError::Config(e.to_string()))?;
    simulate(network, &config, data)
}
