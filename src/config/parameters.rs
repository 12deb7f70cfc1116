//! Run and calibration configuration.
//!
//! Both structures are flat JSON objects with documented defaults. Missing
//! fields take their default; a missing or unreadable file falls back to the
//! defaults with a log message.

use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::biochemistry::bohr::BohrConstants;
use crate::biochemistry::integrator::{SolverMethod, SolverOptions};
use crate::biochemistry::kinetics::KineticsSettings;
use crate::biochemistry::ph_sensitivity::DEFAULT_ACTIVITY_CLIP;
use crate::biochemistry::ph_transport::{
    PhForcing, Severity, TransportConstants, DEFAULT_TRANSITION_H, PHYSIOLOGICAL_PHE, PRESET_START_H,
};
use crate::calibration::CalibrationMethod;

/// Errors in a flat option set or a configuration value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '{key}' has invalid value '{value}': {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("{0}")]
    Invalid(String),
}

fn load_json_or_default<T, P>(path: P, label: &str) -> T
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match std::fs::read_to_string(path.as_ref()) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(value) => {
                log::info!("Loaded {} configuration from {:?}", label, path.as_ref());
                value
            }
            Err(e) => {
                log::warn!("Failed to parse {} configuration: {}, using defaults", label, e);
                T::default()
            }
        },
        Err(_) => {
            log::info!("{} configuration file not found, using defaults", label);
            T::default()
        }
    }
}

/// Top-level configuration container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub run: RunConfig,
    pub calibration: CalibrationConfig,
}

impl Parameters {
    /// Load from `data/parameters/`, or use defaults if files don't exist
    pub fn load_or_default() -> Self {
        Self::load_from_dir("data/parameters")
    }

    /// Load `run.json` and `calibration.json` from a directory
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            run: RunConfig::load_or_default(dir.join("run.json")),
            calibration: CalibrationConfig::load_or_default(dir.join("calibration.json")),
        }
    }
}

/// Shape of the extracellular pH perturbation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerturbationKind {
    /// Constant physiological pHe
    #[default]
    None,
    Constant,
    Step,
    Ramp,
    Sinusoidal,
    Pulse,
    Acidosis,
    Alkalosis,
    Circadian,
}

impl FromStr for PerturbationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => PerturbationKind::None,
            "constant" => PerturbationKind::Constant,
            "step" => PerturbationKind::Step,
            "ramp" => PerturbationKind::Ramp,
            "sinusoidal" | "sine" => PerturbationKind::Sinusoidal,
            "pulse" => PerturbationKind::Pulse,
            "acidosis" => PerturbationKind::Acidosis,
            "alkalosis" => PerturbationKind::Alkalosis,
            "circadian" => PerturbationKind::Circadian,
            other => return Err(format!("unknown pH perturbation '{}'", other)),
        })
    }
}

/// One simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated duration (hours)
    pub t_max_h: f64,
    pub n_output_points: usize,
    /// β: weight of fitted-curve derivatives in blend laws
    pub curve_fit_strength: f64,
    pub method: SolverMethod,
    pub rtol: f64,
    pub atol: f64,
    pub max_steps: usize,
    pub max_step_h: f64,
    /// Take initial conditions of fitted metabolites from their curves
    pub experimental_initial_conditions: bool,

    pub ph_modulation: bool,
    pub ph_perturbation: PerturbationKind,
    pub ph_severity: Severity,
    /// Target pHe; severity delta below baseline when absent
    pub ph_target: Option<f64>,
    pub ph_start_h: f64,
    /// Ramp or pulse duration (hours)
    pub ph_duration_h: Option<f64>,
    pub ph_transition_h: f64,
    pub ph_amplitude: f64,
    pub ph_period_h: f64,
    pub ph_baseline: f64,

    pub transport: TransportConstants,
    pub bohr: BohrConstants,
    /// Upper bound of enzyme pH activity factors
    pub activity_clip: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let solver = SolverOptions::default();
        Self {
            t_max_h: 42.0,
            n_output_points: solver.n_output_points,
            curve_fit_strength: 1.0,
            method: SolverMethod::Auto,
            rtol: solver.rtol,
            atol: solver.atol,
            max_steps: solver.max_steps,
            max_step_h: solver.max_step_h,
            experimental_initial_conditions: true,
            ph_modulation: true,
            ph_perturbation: PerturbationKind::None,
            ph_severity: Severity::Moderate,
            ph_target: None,
            ph_start_h: PRESET_START_H,
            ph_duration_h: None,
            ph_transition_h: DEFAULT_TRANSITION_H,
            ph_amplitude: 0.15,
            ph_period_h: 24.0,
            ph_baseline: PHYSIOLOGICAL_PHE,
            transport: TransportConstants::default(),
            bohr: BohrConstants::default(),
            activity_clip: DEFAULT_ACTIVITY_CLIP,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            message: "expected true or false".into(),
        }),
    }
}

impl RunConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        load_json_or_default(path, "run")
    }

    /// Defaults updated by a flat set of named options
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set_option(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one named option
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "t_max_h" | "duration_h" => self.t_max_h = parse(key, value)?,
            "n_output_points" => self.n_output_points = parse(key, value)?,
            "curve_fit_strength" | "beta" => self.curve_fit_strength = parse(key, value)?,
            "method" | "solver" => self.method = parse(key, value)?,
            "rtol" => self.rtol = parse(key, value)?,
            "atol" => self.atol = parse(key, value)?,
            "max_steps" => self.max_steps = parse(key, value)?,
            "max_step_h" => self.max_step_h = parse(key, value)?,
            "experimental_initial_conditions" => self.experimental_initial_conditions = parse_bool(key, value)?,
            "ph_modulation" => self.ph_modulation = parse_bool(key, value)?,
            "ph_perturbation" => self.ph_perturbation = parse(key, value)?,
            "ph_severity" => self.ph_severity = parse(key, value)?,
            "ph_target" => self.ph_target = Some(parse(key, value)?),
            "ph_start_h" | "ph_start_time" => self.ph_start_h = parse(key, value)?,
            "ph_duration_h" => self.ph_duration_h = Some(parse(key, value)?),
            "ph_transition_h" => self.ph_transition_h = parse(key, value)?,
            "ph_amplitude" => self.ph_amplitude = parse(key, value)?,
            "ph_period_h" => self.ph_period_h = parse(key, value)?,
            "ph_baseline" => self.ph_baseline = parse(key, value)?,
            "activity_clip" => self.activity_clip = parse(key, value)?,
            "p50_normal" => self.bohr.p50_normal_mmHg = parse(key, value)?,
            "bohr_coefficient" => self.bohr.bohr_coefficient = parse(key, value)?,
            "bpg_coefficient" => self.bohr.bpg_coefficient = parse(key, value)?,
            "hill_n" => self.bohr.hill_n = parse(key, value)?,
            _ => {
                let number: f64 = parse(key, value)?;
                if !self.transport.set(key, number) {
                    return Err(ConfigError::UnknownOption(key.to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.t_max_h.is_finite() && self.t_max_h > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "t_max_h must be positive, got {}",
                self.t_max_h
            )));
        }
        if !(0.0..=1.0).contains(&self.curve_fit_strength) {
            return Err(ConfigError::Invalid(format!(
                "curve_fit_strength must lie in [0, 1], got {}",
                self.curve_fit_strength
            )));
        }
        if !(self.activity_clip.is_finite() && self.activity_clip >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "activity_clip must be at least 1, got {}",
                self.activity_clip
            )));
        }
        self.solver_options().validate().map_err(ConfigError::Invalid)?;
        self.transport.validate().map_err(ConfigError::Invalid)?;
        self.bohr.validate().map_err(ConfigError::Invalid)?;
        self.forcing()?.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            rtol: self.rtol,
            atol: self.atol,
            max_steps: self.max_steps,
            max_step_h: self.max_step_h.min(self.t_max_h),
            n_output_points: self.n_output_points,
            ..SolverOptions::default()
        }
    }

    /// Extracellular pH forcing described by the `ph_*` options
    pub fn forcing(&self) -> Result<PhForcing, ConfigError> {
        let baseline = self.ph_baseline;
        let target = self.ph_target.unwrap_or(baseline - self.ph_severity.delta());
        let start_h = self.ph_start_h;
        let forcing = match self.ph_perturbation {
            PerturbationKind::None => PhForcing::Constant { value: PHYSIOLOGICAL_PHE },
            PerturbationKind::Constant => PhForcing::Constant {
                value: self.ph_target.unwrap_or(baseline),
            },
            PerturbationKind::Step => PhForcing::Step {
                baseline,
                target,
                start_h,
                transition_h: self.ph_transition_h,
            },
            PerturbationKind::Ramp => PhForcing::Ramp {
                initial: baseline,
                final_ph: target,
                start_h,
                duration_h: self.ph_duration_h.unwrap_or(4.0),
            },
            PerturbationKind::Sinusoidal => PhForcing::Sinusoidal {
                mean: baseline,
                amplitude: self.ph_amplitude,
                period_h: self.ph_period_h,
                phase_h: start_h,
            },
            PerturbationKind::Pulse => PhForcing::Pulse {
                baseline,
                shock: target,
                start_h,
                duration_h: self.ph_duration_h.unwrap_or(1.0),
            },
            PerturbationKind::Acidosis => PhForcing::acidosis(self.ph_severity),
            PerturbationKind::Alkalosis => PhForcing::alkalosis(self.ph_severity),
            PerturbationKind::Circadian => PhForcing::circadian(),
        };
        forcing.validate().map_err(ConfigError::Invalid)?;
        Ok(forcing)
    }

    pub fn kinetics_settings(&self) -> Result<KineticsSettings, ConfigError> {
        Ok(KineticsSettings {
            curve_fit_strength: self.curve_fit_strength,
            ph_modulation: self.ph_modulation,
            forcing: self.forcing()?,
            transport: self.transport,
        })
    }
}

/// One calibration call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub method: CalibrationMethod,
    /// Generations for the population search, iterations otherwise
    pub max_iter: usize,
    pub confidence_level: f64,
    pub seed: u64,
    /// Population size per parameter
    pub popsize: usize,
    /// Differential weight, dithered uniformly per generation
    pub mutation: (f64, f64),
    pub recombination: f64,
    /// Relative spread of population objectives that stops the search
    pub tol: f64,
    /// Refine the population optimum with the local backend
    pub polish: bool,
    /// Objective of a failed or invalid trial
    pub penalty: f64,
    /// Relative perturbation for sensitivity
    pub sensitivity_step: f64,
    /// Relative step of the central-difference Hessian
    pub hessian_step: f64,
    pub bootstrap_samples: usize,
    /// Leave-one-timepoint-out evaluation of the optimum
    pub cross_validate: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::DifferentialEvolution,
            max_iter: 100,
            confidence_level: 0.95,
            seed: 42,
            popsize: 15,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            tol: 0.01,
            polish: true,
            penalty: 1e10,
            sensitivity_step: 0.01,
            hessian_step: 1e-4,
            bootstrap_samples: 20,
            cross_validate: false,
        }
    }
}

impl CalibrationConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        load_json_or_default(path, "calibration")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));
        if self.max_iter == 0 {
            return invalid("max_iter must be positive".into());
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return invalid(format!("confidence_level must lie in (0, 1), got {}", self.confidence_level));
        }
        if self.popsize == 0 {
            return invalid("popsize must be positive".into());
        }
        let (f_lo, f_hi) = self.mutation;
        if !(f_lo >= 0.0 && f_lo <= f_hi && f_hi <= 2.0) {
            return invalid(format!("mutation must satisfy 0 <= lo <= hi <= 2, got ({}, {})", f_lo, f_hi));
        }
        if !(0.0..=1.0).contains(&self.recombination) {
            return invalid(format!("recombination must lie in [0, 1], got {}", self.recombination));
        }
        if !(self.penalty.is_finite() && self.penalty > 0.0) {
            return invalid(format!("penalty must be finite and positive, got {}", self.penalty));
        }
        for (name, step) in [("sensitivity_step", self.sensitivity_step), ("hessian_step", self.hessian_step)] {
            if !(step > 0.0 && step < 1.0) {
                return invalid(format!("{} must lie in (0, 1), got {}", name, step));
            }
        }
        if !(self.tol >= 0.0) {
            return invalid(format!("tol must be non-negative, got {}", self.tol));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.t_max_h, 42.0);
        assert_eq!(config.n_output_points, 75);
        assert_eq!(config.curve_fit_strength, 1.0);
        assert_eq!(config.method, SolverMethod::Auto);
        assert!(config.validate().is_ok());
        assert_eq!(config.forcing().unwrap(), PhForcing::Constant { value: 7.4 });
    }

    #[test]
    fn test_from_options() {
        let config = RunConfig::from_options([
            ("t_max_h", "6"),
            ("method", "bdf"),
            ("ph_perturbation", "step"),
            ("ph_target", "7.0"),
            ("K_NHE", "5"),
            ("ph_modulation", "on"),
        ])
        .unwrap();
        assert_eq!(config.t_max_h, 6.0);
        assert_eq!(config.method, SolverMethod::Stiff);
        assert_eq!(config.transport.k_nhe, 5.0);
        match config.forcing().unwrap() {
            PhForcing::Step { baseline, target, start_h, .. } => {
                assert_eq!((baseline, target, start_h), (7.4, 7.0, 2.0));
            }
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn test_severity_sets_missing_target() {
        let config = RunConfig::from_options([("ph_perturbation", "pulse"), ("ph_severity", "severe")]).unwrap();
        match config.forcing().unwrap() {
            PhForcing::Pulse { shock, .. } => assert!((shock - 6.9).abs() < 1e-12),
            other => panic!("expected pulse, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_options() {
        assert_eq!(
            RunConfig::from_options([("warp_factor", "9")]),
            Err(ConfigError::UnknownOption("warp_factor".into()))
        );
        assert!(matches!(
            RunConfig::from_options([("rtol", "tight")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            RunConfig::from_options([("curve_fit_strength", "1.5")]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let params = Parameters::load_from_dir(dir.path());
        assert_eq!(params.run, RunConfig::default());
        assert_eq!(params.calibration, CalibrationConfig::default());
    }

    #[test]
    fn test_shipped_files_match_defaults() {
        let params = Parameters::load_from_dir("data/parameters");
        assert_eq!(params.run, RunConfig::default());
        assert_eq!(params.calibration, CalibrationConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.json"), r#"{"t_max_h": 12.0, "method": "stiff"}"#).unwrap();
        std::fs::write(dir.path().join("calibration.json"), "not json").unwrap();
        let params = Parameters::load_from_dir(dir.path());
        assert_eq!(params.run.t_max_h, 12.0);
        assert_eq!(params.run.method, SolverMethod::Stiff);
        assert_eq!(params.run.n_output_points, 75);
        assert_eq!(params.calibration.seed, 42);
    }

    #[test]
    fn test_calibration_validation() {
        assert!(CalibrationConfig::default().validate().is_ok());
        let bad = CalibrationConfig {
            confidence_level: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let params = Parameters::default();
        let json = serde_json::to_string_pretty(&params).unwrap();
        let parsed: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run, params.run);
        assert_eq!(parsed.calibration, params.calibration);
    }
}
