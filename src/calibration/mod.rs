//! Parameter calibration against experimental time courses.
//!
//! A calibration treats the simulator as a black box behind the [`Model`]
//! trait. The objective is the sum of squared residuals between simulated
//! and measured concentrations at the measurement times, over every target
//! metabolite. A trial that fails, produces non-finite values or drives a
//! target negative scores the configured penalty instead.
//!
//! Three backends search the parameter box, all on the unit cube so that
//! parameters of very different magnitude are treated alike:
//! - `DifferentialEvolution`: population search (best1bin), optional polish
//! - `Local`: projected gradient with Barzilai-Borwein steps
//! - `LeastSquares`: bounded Levenberg-Marquardt on the residual vector
//!
//! The optimum is then characterized by confidence intervals (curvature, or
//! bootstrap when the curvature is unusable), per-parameter sensitivity, R²,
//! the residual table and optionally leave-one-timepoint-out validation.
//!
//! References:
//! - Storn R, Price K. J Global Optim. 1997;11:341-359
//! - Barzilai J, Borwein JM. IMA J Numer Anal. 1988;8:141-148
//! - Marquardt DW. J Soc Ind Appl Math. 1963;11:431-441
//! - Bates DM, Watts DG. Nonlinear Regression Analysis. Wiley, 1988

pub mod differential_evolution;
pub mod least_squares;
pub mod local;
pub mod statistics;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::biochemistry::simulation::{Simulator, Trajectory, NEGATIVE_TOLERANCE_MM};
use crate::config::CalibrationConfig;
use crate::error::{CalibrationError, DataAlignmentError, OptimizerNonConvergence, SimulationError};
use crate::experimental::ExperimentalData;

/// Search backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    #[default]
    DifferentialEvolution,
    Local,
    LeastSquares,
}

impl CalibrationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            CalibrationMethod::DifferentialEvolution => "differential_evolution",
            CalibrationMethod::Local => "local",
            CalibrationMethod::LeastSquares => "least_squares",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CalibrationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "differential_evolution" | "de" | "global" => Ok(CalibrationMethod::DifferentialEvolution),
            "local" | "minimize" | "l-bfgs-b" => Ok(CalibrationMethod::Local),
            "least_squares" | "lm" | "trf" => Ok(CalibrationMethod::LeastSquares),
            other => Err(format!(
                "unknown calibration method '{}' (expected differential_evolution, local or least_squares)",
                other
            )),
        }
    }
}

/// A simulator the calibration engine can drive
pub trait Model: Sync {
    /// Names of the state components of every trajectory
    fn state_names(&self) -> Vec<String>;

    /// End of the simulated time range (hours)
    fn t_max_h(&self) -> f64;

    /// Run with the given parameter values
    fn simulate(&self, parameters: &[(&str, f64)]) -> Result<Trajectory, SimulationError>;
}

impl Model for Simulator {
    fn state_names(&self) -> Vec<String> {
        let network = self.network();
        (0..network.n_state()).map(|i| network.state_name(i).to_string()).collect()
    }

    fn t_max_h(&self) -> f64 {
        self.config().t_max_h
    }

    fn simulate(&self, parameters: &[(&str, f64)]) -> Result<Trajectory, SimulationError> {
        self.run_with(parameters)
    }
}

/// A closure presented as a [`Model`]
pub struct FnModel<F> {
    state_names: Vec<String>,
    t_max_h: f64,
    simulate: F,
}

impl<F> FnModel<F>
where
    F: Fn(&[(&str, f64)]) -> Result<Trajectory, SimulationError> + Sync,
{
    pub fn new(state_names: Vec<String>, t_max_h: f64, simulate: F) -> Self {
        Self {
            state_names,
            t_max_h,
            simulate,
        }
    }
}

impl<F> Model for FnModel<F>
where
    F: Fn(&[(&str, f64)]) -> Result<Trajectory, SimulationError> + Sync,
{
    fn state_names(&self) -> Vec<String> {
        self.state_names.clone()
    }

    fn t_max_h(&self) -> f64 {
        self.t_max_h
    }

    fn simulate(&self, parameters: &[(&str, f64)]) -> Result<Trajectory, SimulationError> {
        (self.simulate)(parameters)
    }
}

/// One parameter to optimize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub name: String,
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Ordered parameters to optimize
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    parameters: Vec<ParameterBounds>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ParameterSet::push`]
    pub fn with(mut self, name: &str, initial: f64, lower: f64, upper: f64) -> Self {
        self.push(name, initial, lower, upper);
        self
    }

    pub fn push(&mut self, name: &str, initial: f64, lower: f64, upper: f64) {
        self.parameters.push(ParameterBounds {
            name: name.to_string(),
            initial,
            lower,
            upper,
        });
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterBounds> {
        self.parameters.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn initial_values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.initial).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().map(|p| (p.lower, p.upper)).collect()
    }

    /// Bounds must be finite and ordered, with the initial value inside
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.parameters.is_empty() {
            return Err(CalibrationError::Config("no parameters to calibrate".into()));
        }
        for (i, p) in self.parameters.iter().enumerate() {
            let fail = |message: &str| {
                Err(CalibrationError::InvalidBounds {
                    name: p.name.clone(),
                    initial: p.initial,
                    lower: p.lower,
                    upper: p.upper,
                    message: message.to_string(),
                })
            };
            if !(p.initial.is_finite() && p.lower.is_finite() && p.upper.is_finite()) {
                return fail("values must be finite");
            }
            if p.lower > p.upper {
                return fail("lower bound exceeds upper bound");
            }
            if p.initial < p.lower || p.initial > p.upper {
                return fail("initial value outside bounds");
            }
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return fail("parameter listed twice");
            }
        }
        Ok(())
    }
}

/// Best point found by a backend, in unit-cube coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Optimum {
    pub u: Vec<f64>,
    pub f: f64,
    /// Generations or iterations performed
    pub iterations: usize,
    pub converged: bool,
    pub message: String,
}

/// How the confidence intervals were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    /// Curvature of the objective at the optimum
    Hessian,
    /// Residual bootstrap with local re-fits
    Bootstrap,
    /// (0.5 x, 2 x), clipped to bounds
    Heuristic,
}

/// Calibrated value of one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedParameter {
    pub name: String,
    pub initial: f64,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_interval: (f64, f64),
    /// |∂f/∂p| · p / f at the optimum
    pub sensitivity: f64,
}

/// One row of the residual table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Residual {
    pub metabolite: String,
    pub time_h: f64,
    pub observed_mM: f64,
    pub simulated_mM: f64,
    /// simulated - observed
    pub residual_mM: f64,
}

/// One leave-one-timepoint-out fold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationFold {
    pub held_out_time_h: f64,
    pub n_held_out: usize,
    /// RMSE on the held-out points after re-fitting without them (mM)
    pub rmse: f64,
    pub parameters: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidation {
    pub folds: Vec<CrossValidationFold>,
    pub mean_rmse: f64,
    pub std_rmse: f64,
}

/// Everything a calibration call reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub method: CalibrationMethod,
    pub parameters: Vec<FittedParameter>,
    /// Sum of squared residuals at the optimum
    pub objective: f64,
    pub initial_objective: f64,
    pub r_squared: f64,
    pub success: bool,
    pub message: String,
    pub iterations: usize,
    /// Simulations run by the search and the statistics
    pub evaluations: usize,
    pub confidence_level: f64,
    pub confidence_method: ConfidenceMethod,
    pub residuals: Vec<Residual>,
    pub convergence: Option<OptimizerNonConvergence>,
    pub cross_validation: Option<CrossValidation>,
}

impl CalibrationResult {
    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameter(name).map(|p| p.value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }
}

/// One measurement the objective compares against
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    metabolite: usize,
    state_index: usize,
    time_h: f64,
}

/// Objective, residuals and coordinate maps of one calibration call
pub(crate) struct Problem<'a, M: Model + ?Sized> {
    model: &'a M,
    names: Vec<&'a str>,
    bounds: Vec<(f64, f64)>,
    metabolites: Vec<String>,
    observations: Vec<Observation>,
    observed: Vec<f64>,
    penalty: f64,
    evaluations: AtomicUsize,
}

impl<'a, M: Model + ?Sized> Problem<'a, M> {
    fn align(
        model: &'a M,
        parameters: &'a ParameterSet,
        data: &ExperimentalData,
        targets: &[&str],
        penalty: f64,
    ) -> Result<Self, DataAlignmentError> {
        if targets.is_empty() {
            return Err(DataAlignmentError::NoTargets);
        }
        let state_names = model.state_names();
        let t_max_h = model.t_max_h();
        let mut metabolites = Vec::new();
        let mut observations = Vec::new();
        let mut observed = Vec::new();

        for &target in targets {
            let state_index = state_names
                .iter()
                .position(|n| n == target)
                .ok_or_else(|| DataAlignmentError::NotInNetwork(target.to_string()))?;
            let series = data
                .series(target)
                .ok_or_else(|| DataAlignmentError::NotInData(target.to_string()))?;

            let before = observations.len();
            for (&t, &v) in series.times_h.iter().zip(&series.values_mM) {
                // Only points inside the simulated window [0, t_max] can be scored
                if (0.0..=t_max_h + 1e-9).contains(&t) {
                    observations.push(Observation {
                        metabolite: metabolites.len(),
                        state_index,
                        time_h: t,
                    });
                    observed.push(v);
                }
            }
            if observations.len() == before {
                return Err(DataAlignmentError::NoTimeOverlap {
                    metabolite: target.to_string(),
                    first_h: series.first_time().unwrap_or(f64::NAN),
                    last_h: series.last_time().unwrap_or(f64::NAN),
                    t_max_h,
                });
            }
            metabolites.push(target.to_string());
        }

        Ok(Self {
            model,
            names: parameters.names(),
            bounds: parameters.bounds(),
            metabolites,
            observations,
            observed,
            penalty,
            evaluations: AtomicUsize::new(0),
        })
    }

    fn n_params(&self) -> usize {
        self.bounds.len()
    }

    fn n_observations(&self) -> usize {
        self.observations.len()
    }

    fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn to_real(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .zip(&self.bounds)
            .map(|(u, (lo, hi))| lo + u.clamp(0.0, 1.0) * (hi - lo))
            .collect()
    }

    fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.bounds)
            .map(|(x, (lo, hi))| if hi > lo { ((x - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.0 })
            .collect()
    }

    fn within_bounds(&self, x: &[f64]) -> bool {
        x.iter().zip(&self.bounds).all(|(x, (lo, hi))| *x >= *lo && *x <= *hi)
    }

    /// Simulated values at every observation; `None` for a failed trial
    fn simulated(&self, x: &[f64]) -> Option<Vec<f64>> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let pairs: Vec<(&str, f64)> = self.names.iter().copied().zip(x.iter().copied()).collect();
        let trajectory = match self.model.simulate(&pairs) {
            Ok(trajectory) => trajectory,
            Err(e) => {
                log::debug!("Trial {:?} penalized: {}", pairs, e);
                return None;
            }
        };

        let mut values = Vec::with_capacity(self.observations.len());
        for obs in &self.observations {
            match trajectory.value_at(obs.state_index, obs.time_h) {
                Some(v) if v.is_finite() && v >= -NEGATIVE_TOLERANCE_MM => values.push(v),
                other => {
                    log::debug!(
                        "Trial {:?} penalized: {} at t = {:.2} h is {:?}",
                        pairs,
                        self.metabolites[obs.metabolite],
                        obs.time_h,
                        other
                    );
                    return None;
                }
            }
        }
        Some(values)
    }

    /// Sum of squared residuals against `observed`, restricted to `mask` when given
    fn ssr_against(&self, x: &[f64], observed: &[f64], mask: Option<&[bool]>) -> f64 {
        let Some(simulated) = self.simulated(x) else {
            return self.penalty;
        };
        let ssr: f64 = simulated
            .iter()
            .zip(observed)
            .enumerate()
            .filter(|(k, _)| mask.map_or(true, |m| m[*k]))
            .map(|(_, (s, o))| (s - o).powi(2))
            .sum();
        if ssr.is_finite() {
            ssr
        } else {
            self.penalty
        }
    }

    fn objective(&self, x: &[f64]) -> f64 {
        self.ssr_against(x, &self.observed, None)
    }

    /// Objective with failed trials as NaN, for finite-difference statistics
    fn usable_objective(&self, x: &[f64]) -> f64 {
        let f = self.objective(x);
        if f < self.penalty {
            f
        } else {
            f64::NAN
        }
    }

    fn objective_unit(&self, u: &[f64]) -> f64 {
        self.objective(&self.to_real(u))
    }

    /// Residual vector (simulated - observed); a failed trial spreads the penalty evenly
    fn residuals_unit(&self, u: &[f64]) -> Vec<f64> {
        let x = self.to_real(u);
        match self.simulated(&x) {
            Some(simulated) => {
                let r: Vec<f64> = simulated.iter().zip(&self.observed).map(|(s, o)| s - o).collect();
                if r.iter().all(|v| v.is_finite()) {
                    r
                } else {
                    self.penalty_residuals()
                }
            }
            None => self.penalty_residuals(),
        }
    }

    fn penalty_residuals(&self) -> Vec<f64> {
        let m = self.n_observations().max(1);
        vec![(self.penalty / m as f64).sqrt(); m]
    }

    fn residual_table(&self, simulated: &[f64]) -> Vec<Residual> {
        self.observations
            .iter()
            .zip(simulated.iter().zip(&self.observed))
            .map(|(obs, (&s, &o))| Residual {
                metabolite: self.metabolites[obs.metabolite].clone(),
                time_h: obs.time_h,
                observed_mM: o,
                simulated_mM: s,
                residual_mM: s - o,
            })
            .collect()
    }

    /// Distinct observation times, ascending
    fn observation_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.observations.iter().map(|o| o.time_h).collect();
        times.sort_by(f64::total_cmp);
        times.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        times
    }
}

/// Fit `parameters` so `model` reproduces `data` for the `targets`
///
/// Configuration, bounds and data-alignment problems are errors; failed
/// trials and non-convergence are reported inside the result.
pub fn calibrate<M: Model + ?Sized>(
    parameters: &ParameterSet,
    model: &M,
    data: &ExperimentalData,
    targets: &[&str],
    config: &CalibrationConfig,
) -> Result<CalibrationResult, CalibrationError> {
    config.validate().map_err(|e| CalibrationError::Config(e.to_string()))?;
    parameters.validate()?;
    let problem = Problem::align(model, parameters, data, targets, config.penalty)?;

    log::info!(
        "Calibrating {} parameters against {} observations of {} metabolites ({})",
        problem.n_params(),
        problem.n_observations(),
        targets.len(),
        config.method
    );

    let x0 = parameters.initial_values();
    let initial_objective = problem.objective(&x0);
    let u0 = problem.to_unit(&x0);
    let objective = |u: &[f64]| problem.objective_unit(u);

    let optimum = match config.method {
        CalibrationMethod::DifferentialEvolution => differential_evolution::optimize(&objective, &u0, config),
        CalibrationMethod::Local => local::minimize(&objective, &u0, &local::LocalSettings::from_config(config)),
        CalibrationMethod::LeastSquares => least_squares::solve(
            &|u: &[f64]| problem.residuals_unit(u),
            &u0,
            &least_squares::LeastSquaresSettings::from_config(config),
        ),
    };

    let x = problem.to_real(&optimum.u);
    if !problem.within_bounds(&x) {
        return Err(CalibrationError::Config(format!(
            "optimizer returned {:?} outside the bounds {:?}",
            x, problem.bounds
        )));
    }
    let simulated = problem.simulated(&x);
    // Rescored at x: a failed optimum reports exactly the penalty
    let f = match &simulated {
        Some(s) => {
            let ssr: f64 = s.iter().zip(&problem.observed).map(|(s, o)| (s - o).powi(2)).sum();
            if ssr.is_finite() {
                ssr
            } else {
                problem.penalty
            }
        }
        None => problem.penalty,
    };
    let (r_squared, residuals) = match &simulated {
        Some(s) => (statistics::r_squared(&problem.observed, s), problem.residual_table(s)),
        None => (0.0, Vec::new()),
    };

    let (intervals, confidence_method) = statistics::confidence_intervals(&problem, &x, f, simulated.as_deref(), config);
    let sensitivity = statistics::sensitivity(
        &|p: &[f64]| problem.usable_objective(p),
        &x,
        f,
        config.sensitivity_step,
        &problem.bounds,
    );
    let cross_validation = if config.cross_validate {
        Some(statistics::cross_validate(&problem, &x, config))
    } else {
        None
    };

    let success = optimum.converged && f < config.penalty;
    let convergence = if success {
        None
    } else {
        let message = if f >= config.penalty {
            format!("{}; every trial failed", optimum.message)
        } else {
            optimum.message.clone()
        };
        log::warn!(
            "Calibration did not converge after {} iterations (best objective {:.4e}): {}",
            optimum.iterations,
            f,
            message
        );
        Some(OptimizerNonConvergence {
            iterations: optimum.iterations,
            best_objective: f,
            message,
        })
    };

    let fitted = parameters
        .iter()
        .enumerate()
        .map(|(i, p)| FittedParameter {
            name: p.name.clone(),
            initial: p.initial,
            value: x[i],
            lower: p.lower,
            upper: p.upper,
            confidence_interval: intervals[i],
            sensitivity: sensitivity[i],
        })
        .collect();

    log::info!(
        "Calibration finished: objective {:.4e} -> {:.4e}, R² {:.4}, {} simulations",
        initial_objective,
        f,
        r_squared,
        problem.evaluations()
    );

    Ok(CalibrationResult {
        method: config.method,
        parameters: fitted,
        objective: f,
        initial_objective,
        r_squared,
        success,
        message: optimum.message,
        iterations: optimum.iterations,
        evaluations: problem.evaluations(),
        confidence_level: config.confidence_level,
        confidence_method,
        residuals,
        convergence,
        cross_validation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_model() -> FnModel<impl Fn(&[(&str, f64)]) -> Result<Trajectory, SimulationError> + Sync> {
        FnModel::new(vec!["A".into()], 10.0, |params: &[(&str, f64)]| {
            let (a, b) = (params[0].1, params[1].1);
            let times_h: Vec<f64> = (0..=10).map(f64::from).collect();
            Ok(Trajectory {
                state_names: vec!["A".into()],
                states: times_h.iter().map(|t| vec![a + b * t]).collect(),
                times_h,
                ..Default::default()
            })
        })
    }

    fn linear_data() -> ExperimentalData {
        let mut data = ExperimentalData::new();
        data.insert("A", &[0.0, 2.0, 5.0, 8.0, 12.0], &[1.0, 2.0, 3.5, 5.0, 7.0]);
        data
    }

    #[test]
    fn test_parameter_validation() {
        assert!(matches!(ParameterSet::new().validate(), Err(CalibrationError::Config(_))));
        let outside = ParameterSet::new().with("a", 5.0, 0.0, 1.0);
        match outside.validate() {
            Err(CalibrationError::InvalidBounds { name, initial, .. }) => {
                assert_eq!(name, "a");
                assert_eq!(initial, 5.0);
            }
            other => panic!("expected invalid bounds, got {:?}", other),
        }
        let inverted = ParameterSet::new().with("a", 0.5, 1.0, 0.0);
        assert!(inverted.validate().is_err());
        let twice = ParameterSet::new().with("a", 0.5, 0.0, 1.0).with("a", 0.5, 0.0, 1.0);
        assert!(twice.validate().is_err());
    }

    #[test]
    fn test_alignment_errors() {
        let model = linear_model();
        let params = ParameterSet::new().with("a", 1.0, 0.0, 5.0).with("b", 0.5, 0.0, 2.0);
        let data = linear_data();
        let config = CalibrationConfig::default();

        assert!(matches!(
            calibrate(&params, &model, &data, &[], &config),
            Err(CalibrationError::DataAlignment(DataAlignmentError::NoTargets))
        ));
        assert!(matches!(
            calibrate(&params, &model, &data, &["B"], &config),
            Err(CalibrationError::DataAlignment(DataAlignmentError::NotInNetwork(_)))
        ));

        let mut late = ExperimentalData::new();
        late.insert("A", &[20.0, 30.0], &[1.0, 2.0]);
        assert!(matches!(
            calibrate(&params, &model, &late, &["A"], &config),
            Err(CalibrationError::DataAlignment(DataAlignmentError::NoTimeOverlap { .. }))
        ));
        let empty = ExperimentalData::new();
        assert!(matches!(
            calibrate(&params, &model, &empty, &["A"], &config),
            Err(CalibrationError::DataAlignment(DataAlignmentError::NotInData(_)))
        ));
    }

    #[test]
    fn test_points_outside_run_are_ignored() {
        let model = linear_model();
        let params = ParameterSet::new().with("a", 1.0, 0.0, 5.0).with("b", 0.5, 0.0, 2.0);
        let data = linear_data();
        let problem = Problem::align(&model, &params, &data, &["A"], 1e10).unwrap();
        // t = 12 lies beyond the 10 h run
        assert_eq!(problem.n_observations(), 4);
        assert_eq!(problem.observation_times(), vec![0.0, 2.0, 5.0, 8.0]);
    }

    #[test]
    fn test_unit_mapping() {
        let model = linear_model();
        let params = ParameterSet::new().with("a", 1.0, 0.0, 5.0).with("b", 0.5, -1.0, 1.0);
        let data = linear_data();
        let problem = Problem::align(&model, &params, &data, &["A"], 1e10).unwrap();
        let u = problem.to_unit(&[2.5, 0.0]);
        assert_eq!(u, vec![0.5, 0.5]);
        assert_eq!(problem.to_real(&u), vec![2.5, 0.0]);
        assert_eq!(problem.to_real(&[1.5, -0.2]), vec![5.0, -1.0]);
    }

    #[test]
    fn test_failed_trial_scores_penalty() {
        let model = FnModel::new(vec!["A".into()], 10.0, |_: &[(&str, f64)]| {
            Err(SimulationError::Config("always fails".into()))
        });
        let params = ParameterSet::new().with("a", 1.0, 0.0, 5.0);
        let data = linear_data();
        let problem = Problem::align(&model, &params, &data, &["A"], 1e10).unwrap();
        assert_eq!(problem.objective(&[1.0]), 1e10);
        let r = problem.residuals_unit(&[0.5]);
        let ssr: f64 = r.iter().map(|v| v * v).sum();
        assert!((ssr - 1e10).abs() < 1e-3);
    }

    #[test]
    fn test_negative_target_scores_penalty() {
        let model = linear_model();
        let params = ParameterSet::new().with("a", 1.0, -5.0, 5.0).with("b", 0.5, 0.0, 2.0);
        let data = linear_data();
        let problem = Problem::align(&model, &params, &data, &["A"], 1e10).unwrap();
        assert_eq!(problem.objective(&[-1.0, 0.1]), 1e10);
        assert!(problem.objective(&[1.0, 0.5]) < 1.0);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("de".parse::<CalibrationMethod>(), Ok(CalibrationMethod::DifferentialEvolution));
        assert_eq!("L-BFGS-B".parse::<CalibrationMethod>(), Ok(CalibrationMethod::Local));
        assert_eq!("least_squares".parse::<CalibrationMethod>(), Ok(CalibrationMethod::LeastSquares));
        assert!("annealing".parse::<CalibrationMethod>().is_err());
    }
}
