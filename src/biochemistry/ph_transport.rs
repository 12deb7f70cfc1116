//! Extracellular pH forcing and intracellular proton transport.
//!
//! Extracellular pH (pHe) is not integrated: it is a pure function of time
//! given by a [`PhForcing`]. Intracellular pH (pHi) is a state component whose
//! derivative combines metabolic proton production with three membrane
//! pathways, divided by the cytoplasmic buffer capacity:
//!
//! dpHi/dt = (1/β) (metabolic + J_passive + J_AE1 + J_NHE)
//!
//! - J_passive: passive H+ diffusion, proportional to pHe - pHi
//! - J_AE1: Cl-/HCO3- exchange (band 3), linear in the pHi offset from its set point
//! - J_NHE: Na+/H+ exchange, saturating in the pHi offset from its set point
//!
//! At rest (pHi 7.2, pHe 7.4) passive diffusion raises pHi and band 3 loads
//! the same amount of acid back, so the cell stays at its set point. The
//! band 3 set point is derived from the other constants to keep that balance.
//!
//! References:
//! - Van Slyke DD. J Biol Chem. 1922;52:525-570 (buffer capacity definition)
//! - Jacobs MH, Stewart DR. J Cell Comp Physiol. 1947;30:79-103 (RBC pH)
//! - Hladky SB, Rink TJ. J Physiol. 1977;263:287-319 (resting H+ distribution)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resting intracellular pH
pub const PHYSIOLOGICAL_PHI: f64 = 7.2;

/// Resting extracellular pH
pub const PHYSIOLOGICAL_PHE: f64 = 7.4;

/// Physiological pH band; every forcing value is clipped to it
pub const PH_MIN: f64 = 6.5;
pub const PH_MAX: f64 = 8.0;

/// Default width of the linear transition of a step (hours)
pub const DEFAULT_TRANSITION_H: f64 = 0.05;

/// Start of the preset scenarios (hours)
pub const PRESET_START_H: f64 = 2.0;

/// Perturbation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    /// pH excursion of the generic step and pulse perturbations
    pub fn delta(&self) -> f64 {
        match self {
            Severity::Mild => 0.1,
            Severity::Moderate => 0.3,
            Severity::Severe => 0.5,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            other => Err(format!("unknown severity '{}' (mild|moderate|severe)", other)),
        }
    }
}

/// Extracellular pH as a function of time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PhForcing {
    Constant {
        value: f64,
    },
    /// Linear change from `baseline` to `target` over `[start_h, start_h + transition_h]`
    Step {
        baseline: f64,
        target: f64,
        start_h: f64,
        transition_h: f64,
    },
    Ramp {
        initial: f64,
        final_ph: f64,
        start_h: f64,
        duration_h: f64,
    },
    /// mean + amplitude * sin(2π (t - phase) / period)
    Sinusoidal {
        mean: f64,
        amplitude: f64,
        period_h: f64,
        phase_h: f64,
    },
    /// `shock` during `[start_h, start_h + duration_h)`, `baseline` otherwise
    Pulse {
        baseline: f64,
        shock: f64,
        start_h: f64,
        duration_h: f64,
    },
}

impl Default for PhForcing {
    fn default() -> Self {
        PhForcing::Constant { value: PHYSIOLOGICAL_PHE }
    }
}

impl PhForcing {
    /// Anything but a constant pHe
    pub fn is_perturbed(&self) -> bool {
        !matches!(self, PhForcing::Constant { .. })
    }

    /// Step to `target` at `start_h` with the default transition window
    pub fn step(baseline: f64, target: f64, start_h: f64) -> Self {
        PhForcing::Step {
            baseline,
            target,
            start_h,
            transition_h: DEFAULT_TRANSITION_H,
        }
    }

    /// Ramp from 7.4 toward 7.2/7.0/6.8 over 4/6/8 h, starting at 2 h
    pub fn acidosis(severity: Severity) -> Self {
        let (final_ph, duration_h) = match severity {
            Severity::Mild => (7.2, 4.0),
            Severity::Moderate => (7.0, 6.0),
            Severity::Severe => (6.8, 8.0),
        };
        PhForcing::Ramp {
            initial: PHYSIOLOGICAL_PHE,
            final_ph,
            start_h: PRESET_START_H,
            duration_h,
        }
    }

    /// Ramp from 7.4 toward 7.6/7.7/7.8 over 4/6/8 h, starting at 2 h
    pub fn alkalosis(severity: Severity) -> Self {
        let (final_ph, duration_h) = match severity {
            Severity::Mild => (7.6, 4.0),
            Severity::Moderate => (7.7, 6.0),
            Severity::Severe => (7.8, 8.0),
        };
        PhForcing::Ramp {
            initial: PHYSIOLOGICAL_PHE,
            final_ph,
            start_h: PRESET_START_H,
            duration_h,
        }
    }

    /// 7.4 ± 0.15 with a 24 h period
    pub fn circadian() -> Self {
        PhForcing::Sinusoidal {
            mean: PHYSIOLOGICAL_PHE,
            amplitude: 0.15,
            period_h: 24.0,
            phase_h: 0.0,
        }
    }

    /// Extracellular pH at time `t_h`, clipped to [6.5, 8.0]
    pub fn ph_e(&self, t_h: f64) -> f64 {
        let value = match *self {
            PhForcing::Constant { value } => value,
            PhForcing::Step {
                baseline,
                target,
                start_h,
                transition_h,
            } => {
                if t_h < start_h {
                    baseline
                } else if transition_h <= 0.0 || t_h >= start_h + transition_h {
                    target
                } else {
                    baseline + (target - baseline) * (t_h - start_h) / transition_h
                }
            }
            PhForcing::Ramp {
                initial,
                final_ph,
                start_h,
                duration_h,
            } => {
                if t_h < start_h {
                    initial
                } else if duration_h <= 0.0 || t_h >= start_h + duration_h {
                    final_ph
                } else {
                    initial + (final_ph - initial) * (t_h - start_h) / duration_h
                }
            }
            PhForcing::Sinusoidal {
                mean,
                amplitude,
                period_h,
                phase_h,
            } => {
                if period_h <= 0.0 {
                    mean
                } else {
                    mean + amplitude * (2.0 * std::f64::consts::PI * (t_h - phase_h) / period_h).sin()
                }
            }
            PhForcing::Pulse {
                baseline,
                shock,
                start_h,
                duration_h,
            } => {
                if t_h >= start_h && t_h < start_h + duration_h {
                    shock
                } else {
                    baseline
                }
            }
        };
        value.clamp(PH_MIN, PH_MAX)
    }

    /// Check parameters are finite and durations non-negative
    pub fn validate(&self) -> Result<(), String> {
        let values: Vec<f64> = match *self {
            PhForcing::Constant { value } => vec![value],
            PhForcing::Step {
                baseline,
                target,
                start_h,
                transition_h,
            } => vec![baseline, target, start_h, transition_h],
            PhForcing::Ramp {
                initial,
                final_ph,
                start_h,
                duration_h,
            } => vec![initial, final_ph, start_h, duration_h],
            PhForcing::Sinusoidal {
                mean,
                amplitude,
                period_h,
                phase_h,
            } => {
                if period_h <= 0.0 {
                    return Err(format!("sinusoidal period must be positive, got {} h", period_h));
                }
                vec![mean, amplitude, period_h, phase_h]
            }
            PhForcing::Pulse {
                baseline,
                shock,
                start_h,
                duration_h,
            } => vec![baseline, shock, start_h, duration_h],
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(format!("non-finite pH forcing parameter in {}", self));
        }
        match *self {
            PhForcing::Step { transition_h: d, .. }
            | PhForcing::Ramp { duration_h: d, .. }
            | PhForcing::Pulse { duration_h: d, .. }
                if d < 0.0 =>
            {
                Err(format!("negative duration {} h in {}", d, self))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PhForcing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhForcing::Constant { value } => write!(f, "constant pHe {:.2}", value),
            PhForcing::Step {
                baseline,
                target,
                start_h,
                ..
            } => write!(f, "step pHe {:.2} -> {:.2} at {:.1} h", baseline, target, start_h),
            PhForcing::Ramp {
                initial,
                final_ph,
                start_h,
                duration_h,
            } => write!(
                f,
                "ramp pHe {:.2} -> {:.2} from {:.1} h over {:.1} h",
                initial, final_ph, start_h, duration_h
            ),
            PhForcing::Sinusoidal {
                mean,
                amplitude,
                period_h,
                ..
            } => write!(f, "sinusoidal pHe {:.2} ± {:.2}, period {:.1} h", mean, amplitude, period_h),
            PhForcing::Pulse {
                baseline,
                shock,
                start_h,
                duration_h,
            } => write!(
                f,
                "pulse pHe {:.2} -> {:.2} at {:.1} h for {:.1} h",
                baseline, shock, start_h, duration_h
            ),
        }
    }
}

/// Membrane transport and buffering constants
///
/// All rates are per hour and act on pH units; every field is calibratable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConstants {
    /// Passive H+ diffusion rate constant (mM/h per pH unit)
    pub k_diff_h: f64,
    /// Na+/H+ exchanger capacity (mM/h)
    pub k_nhe: f64,
    /// Cl-/HCO3- exchanger rate constant (mM/h per pH unit, applied with a 0.5 factor)
    pub k_ae1: f64,
    /// Cytoplasmic buffer capacity (mM per pH unit)
    /// Reference: 30-60 slykes for human RBCs (Van Slyke 1922)
    pub beta_buffer: f64,
    /// Resting intracellular pH held by the exchangers
    pub nhe_set_point: f64,
    /// NHE saturation width (pH units)
    pub nhe_width: f64,
}

impl Default for TransportConstants {
    fn default() -> Self {
        Self {
            k_diff_h: 120.0,
            k_nhe: 10.0,
            k_ae1: 180.0,
            beta_buffer: 30.0,
            nhe_set_point: PHYSIOLOGICAL_PHI,
            nhe_width: 0.1,
        }
    }
}

impl TransportConstants {
    /// Set a constant by its calibration name; false if the name is not a transport constant
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            "K_DIFF_H" => self.k_diff_h = value,
            "K_NHE" => self.k_nhe = value,
            "K_AE1" => self.k_ae1 = value,
            "BETA_BUFFER" => self.beta_buffer = value,
            _ => return false,
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "K_DIFF_H" => Some(self.k_diff_h),
            "K_NHE" => Some(self.k_nhe),
            "K_AE1" => Some(self.k_ae1),
            "BETA_BUFFER" => Some(self.beta_buffer),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let rates = [
            ("K_DIFF_H", self.k_diff_h),
            ("K_NHE", self.k_nhe),
            ("K_AE1", self.k_ae1),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be finite and non-negative, got {}", name, value));
            }
        }
        if !self.beta_buffer.is_finite() || self.beta_buffer <= 0.0 {
            return Err(format!("BETA_BUFFER must be positive, got {}", self.beta_buffer));
        }
        if self.nhe_width <= 0.0 {
            return Err(format!("NHE width must be positive, got {}", self.nhe_width));
        }
        if self.k_ae1 <= 0.0 {
            return Err(format!("K_AE1 must be positive to balance the resting leak, got {}", self.k_ae1));
        }
        Ok(())
    }

    /// pHi at which band 3 is neutral
    ///
    /// Lies below the set point by the amount that makes band 3 cancel the
    /// passive leak at pHi = set point, pHe = 7.4.
    pub fn ae1_set_point(&self) -> f64 {
        let resting_leak = self.k_diff_h * (PHYSIOLOGICAL_PHE - self.nhe_set_point);
        self.nhe_set_point - resting_leak / (0.5 * self.k_ae1)
    }
}

/// Reaction rates that produce or consume protons (mM/h)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProtonSources {
    pub pyruvate_kinase: f64,
    pub lactate_dehydrogenase: f64,
    pub g6pdh: f64,
    pub pgd6: f64,
    pub hexokinase: f64,
    pub phosphofructokinase: f64,
}

impl ProtonSources {
    /// Net metabolic contribution to dpHi (before buffering)
    ///
    /// Glycolytic acid production lowers pH, oxidative PPP steps raise it,
    /// ATP-consuming kinases lower it slightly.
    pub fn metabolic_balance(&self) -> f64 {
        -0.1 * (self.pyruvate_kinase + self.lactate_dehydrogenase) + 0.05 * (self.g6pdh + self.pgd6)
            - 0.01 * (self.hexokinase + self.phosphofructokinase)
    }
}

/// Membrane H+ fluxes in pH units per hour (before buffering)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MembraneFluxes {
    pub passive: f64,
    pub ae1: f64,
    pub nhe: f64,
}

pub fn membrane_fluxes(ph_i: f64, ph_e: f64, k: &TransportConstants) -> MembraneFluxes {
    MembraneFluxes {
        passive: k.k_diff_h * (ph_e - ph_i),
        ae1: 0.5 * k.k_ae1 * (k.ae1_set_point() - ph_i),
        nhe: k.k_nhe * ((k.nhe_set_point - ph_i) / k.nhe_width).tanh(),
    }
}

/// Time derivative of intracellular pH (pH units/h)
pub fn ph_i_derivative(ph_i: f64, ph_e: f64, sources: &ProtonSources, k: &TransportConstants) -> f64 {
    let j = membrane_fluxes(ph_i, ph_e, k);
    (sources.metabolic_balance() + j.passive + j.ae1 + j.nhe) / k.beta_buffer
}

/// Slow first-order pHi relaxation used when pH modulation is disabled
pub fn relaxation_derivative(ph_i: f64, sources: &ProtonSources) -> f64 {
    0.01 * (0.1 * (sources.pyruvate_kinase + sources.lactate_dehydrogenase)
        - 0.05 * (sources.g6pdh + sources.pgd6)
        - 0.2 * (ph_i - PHYSIOLOGICAL_PHI))
}

/// Lag and equilibrium of the pHi response to a pHe change
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepResponse {
    /// pHi just before the perturbation
    pub initial_ph_i: f64,
    /// pHi at the end of the series
    pub final_ph_i: f64,
    /// Time after the perturbation for pHi to cover 50% of its change (hours)
    pub t50_h: Option<f64>,
    /// Time after the perturbation for pHi to cover 90% of its change (hours)
    pub t90_h: Option<f64>,
    /// pHi / pHe at the end of the series
    pub equilibrium_ratio: f64,
}

/// Analyze a pHi/pHe time series around a perturbation starting at `start_h`
///
/// Returns `None` for empty or mismatched series.
pub fn step_response(times_h: &[f64], ph_i: &[f64], ph_e: &[f64], start_h: f64) -> Option<StepResponse> {
    if times_h.is_empty() || times_h.len() != ph_i.len() || times_h.len() != ph_e.len() {
        return None;
    }
    let before = times_h.iter().rposition(|&t| t <= start_h).unwrap_or(0);
    let initial = ph_i[before];
    let last = ph_i.len() - 1;
    let final_ph_i = ph_i[last];
    let change = final_ph_i - initial;

    let crossing = |fraction: f64| -> Option<f64> {
        if change.abs() < 1e-9 {
            return None;
        }
        let level = initial + fraction * change;
        (before..=last)
            .find(|&i| (ph_i[i] - level) * change.signum() >= 0.0)
            .map(|i| times_h[i] - start_h)
    };

    Some(StepResponse {
        initial_ph_i: initial,
        final_ph_i,
        t50_h: crossing(0.5),
        t90_h: crossing(0.9),
        equilibrium_ratio: final_ph_i / ph_e[last],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral() -> ProtonSources {
        ProtonSources::default()
    }

    #[test]
    fn test_forcing_is_pure() {
        let forcing = PhForcing::circadian();
        for t in [0.0, 3.7, 12.0, 41.9] {
            assert_eq!(forcing.ph_e(t).to_bits(), forcing.ph_e(t).to_bits());
        }
    }

    #[test]
    fn test_step_forcing() {
        let step = PhForcing::step(7.4, 7.0, 2.0);
        assert_eq!(step.ph_e(0.0), 7.4);
        assert_eq!(step.ph_e(1.999), 7.4);
        assert_eq!(step.ph_e(2.0 + DEFAULT_TRANSITION_H), 7.0);
        assert_eq!(step.ph_e(30.0), 7.0);
        let mid = step.ph_e(2.0 + DEFAULT_TRANSITION_H / 2.0);
        assert!(mid < 7.4 && mid > 7.0, "transition midpoint {}", mid);
    }

    #[test]
    fn test_ramp_and_presets() {
        let acid = PhForcing::acidosis(Severity::Moderate);
        assert_eq!(acid.ph_e(1.0), 7.4);
        assert!((acid.ph_e(5.0) - 7.2).abs() < 1e-12);
        assert!((acid.ph_e(8.0) - 7.0).abs() < 1e-12);

        let alk = PhForcing::alkalosis(Severity::Severe);
        assert!((alk.ph_e(20.0) - 7.8).abs() < 1e-12);
    }

    #[test]
    fn test_sinusoid_and_pulse() {
        let circ = PhForcing::circadian();
        assert!((circ.ph_e(6.0) - 7.55).abs() < 1e-12);
        assert!((circ.ph_e(18.0) - 7.25).abs() < 1e-12);

        let pulse = PhForcing::Pulse {
            baseline: 7.4,
            shock: 7.0,
            start_h: 2.0,
            duration_h: 1.0,
        };
        assert_eq!(pulse.ph_e(1.5), 7.4);
        assert_eq!(pulse.ph_e(2.5), 7.0);
        assert_eq!(pulse.ph_e(3.0), 7.4);
    }

    #[test]
    fn test_forcing_clipped_to_band() {
        let extreme = PhForcing::Constant { value: 6.0 };
        assert_eq!(extreme.ph_e(1.0), PH_MIN);
        let high = PhForcing::step(7.4, 9.0, 0.0);
        assert_eq!(high.ph_e(1.0), PH_MAX);
    }

    #[test]
    fn test_resting_equilibrium() {
        let k = TransportConstants::default();
        let d = ph_i_derivative(PHYSIOLOGICAL_PHI, PHYSIOLOGICAL_PHE, &neutral(), &k);
        assert!(d.abs() < 1e-12, "resting pHi should be stationary: {}", d);
    }

    #[test]
    fn test_acid_load_lowers_phi() {
        let k = TransportConstants::default();
        let d = ph_i_derivative(7.2, 7.0, &neutral(), &k);
        assert!(d < 0.0, "pHe drop should acidify the cell: {}", d);

        // NHE pushes back against acidification
        let j = membrane_fluxes(6.9, 7.0, &k);
        assert!(j.nhe > 0.0);
        assert!(j.passive > 0.0);
        assert!(membrane_fluxes(7.1, 7.0, &k).passive < 0.0);
    }

    #[test]
    fn test_passive_flux_follows_gradient() {
        let k = TransportConstants::default();
        for (ph_i, ph_e) in [(7.2, 7.4), (7.0, 7.0), (7.3, 6.9)] {
            let j = membrane_fluxes(ph_i, ph_e, &k);
            assert!((j.passive - k.k_diff_h * (ph_e - ph_i)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_band3_set_point_balances_leak() {
        let mut k = TransportConstants::default();
        assert!((k.ae1_set_point() - (7.2 - 24.0 / 90.0)).abs() < 1e-12);

        // Rest stays balanced whatever the calibrated rates are
        k.set("K_DIFF_H", 45.0);
        k.set("K_AE1", 60.0);
        let j = membrane_fluxes(PHYSIOLOGICAL_PHI, PHYSIOLOGICAL_PHE, &k);
        assert!(j.passive > 0.0);
        assert!((j.passive + j.ae1 + j.nhe).abs() < 1e-12);
    }

    #[test]
    fn test_metabolic_acid_production() {
        let sources = ProtonSources {
            pyruvate_kinase: 1.0,
            lactate_dehydrogenase: 1.0,
            ..Default::default()
        };
        assert!(sources.metabolic_balance() < 0.0);
        assert!(relaxation_derivative(7.2, &sources) > 0.0);
        assert!(relaxation_derivative(7.5, &neutral()) < 0.0);
    }

    #[test]
    fn test_transport_set_by_name() {
        let mut k = TransportConstants::default();
        assert!(k.set("K_NHE", 5.0));
        assert_eq!(k.get("K_NHE"), Some(5.0));
        assert!(!k.set("K_UNKNOWN", 1.0));
        k.beta_buffer = 0.0;
        assert!(k.validate().is_err());
    }

    #[test]
    fn test_step_response_metrics() {
        // Exponential approach from 7.2 to 6.9 with tau = 0.5 h starting at 1 h
        let times: Vec<f64> = (0..=60).map(|i| i as f64 * 0.1).collect();
        let phi: Vec<f64> = times
            .iter()
            .map(|&t| if t <= 1.0 { 7.2 } else { 6.9 + 0.3 * (-(t - 1.0) / 0.5).exp() })
            .collect();
        let phe = vec![7.1; times.len()];
        let r = step_response(&times, &phi, &phe, 1.0).expect("valid series");
        let t50 = r.t50_h.expect("half-way reached");
        assert!((t50 - 0.5 * std::f64::consts::LN_2).abs() < 0.11, "t50 {:.3}", t50);
        assert!(r.t90_h.unwrap() > t50);
        assert!((r.equilibrium_ratio - r.final_ph_i / 7.1).abs() < 1e-12);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("Severe".parse::<Severity>(), Ok(Severity::Severe));
        assert!("extreme".parse::<Severity>().is_err());
        assert_eq!(Severity::Moderate.delta(), 0.3);
    }
}
