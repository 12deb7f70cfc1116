//! Smooth curves fitted to experimental time courses.
//!
//! Each series is fitted with
//!
//! c(t) = a + b t + c t² + d t³ + e ln(t + 1)
//!
//! by linear least squares. The log term is shifted by one hour so t = 0 lies
//! inside the domain. Blend and direct-fit flux laws read the analytic
//! derivative of the curve, which is only defined on the fitted time range.

use nalgebra::{DMatrix, DVector};

use crate::error::CurveFitError;
use crate::experimental::{ExperimentalData, TimeSeries};
use crate::network::Network;

/// Distinct time points needed to determine the five coefficients
pub const MIN_FIT_POINTS: usize = 5;

const N_COEFFS: usize = 5;

/// Grid density used to check non-negativity of a fitted curve
const POSITIVITY_SAMPLES: usize = 400;

#[inline]
fn basis(t: f64) -> [f64; N_COEFFS] {
    [1.0, t, t * t, t * t * t, (t + 1.0).ln()]
}

/// Fitted polynomial-log curve of one metabolite
#[derive(Debug, Clone, PartialEq)]
pub struct CurveFit {
    pub metabolite: String,
    /// [a, b, c, d, e]
    pub coefficients: [f64; N_COEFFS],
    pub t_min_h: f64,
    pub t_max_h: f64,
    /// Coefficient of determination against the fitted points
    pub r_squared: f64,
    /// Constant added so the curve stays non-negative on its domain (mM)
    pub positivity_shift: f64,
}

impl CurveFit {
    /// Fit the curve to a time series
    pub fn fit(metabolite: &str, series: &TimeSeries) -> Result<Self, CurveFitError> {
        let n = series.len();
        // Series are deduplicated on load, so every point is a distinct time
        if n < MIN_FIT_POINTS {
            return Err(CurveFitError::TooFewPoints {
                metabolite: metabolite.to_string(),
                points: n,
                required: MIN_FIT_POINTS,
            });
        }

        let design = DMatrix::from_fn(n, N_COEFFS, |i, j| basis(series.times_h[i])[j]);
        let rhs = DVector::from_column_slice(&series.values_mM);

        let svd = design.svd(true, true);
        if svd.rank(1e-10 * svd.singular_values.max()) < N_COEFFS {
            return Err(CurveFitError::Singular(metabolite.to_string()));
        }
        let solution = svd
            .solve(&rhs, 1e-12)
            .map_err(|_| CurveFitError::Singular(metabolite.to_string()))?;

        let mut coefficients = [0.0; N_COEFFS];
        coefficients.copy_from_slice(solution.as_slice());
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(CurveFitError::Singular(metabolite.to_string()));
        }

        let t_min_h = series.times_h[0];
        let t_max_h = series.times_h[n - 1];
        let mut curve = Self {
            metabolite: metabolite.to_string(),
            coefficients,
            t_min_h,
            t_max_h,
            r_squared: 0.0,
            positivity_shift: 0.0,
        };

        // Raise the constant term until the curve is non-negative on its domain
        let minimum = (0..=POSITIVITY_SAMPLES)
            .map(|k| t_min_h + (t_max_h - t_min_h) * k as f64 / POSITIVITY_SAMPLES as f64)
            .chain(series.times_h.iter().copied())
            .map(|t| curve.value(t))
            .fold(f64::INFINITY, f64::min);
        if minimum < 0.0 {
            curve.positivity_shift = -minimum;
            curve.coefficients[0] -= minimum;
            log::debug!("Curve for {} raised by {:.3e} mM to stay non-negative", metabolite, -minimum);
        }

        curve.r_squared = r_squared(series, |t| curve.value(t));
        Ok(curve)
    }

    /// Curve value (mM)
    pub fn value(&self, t_h: f64) -> f64 {
        basis(t_h)
            .iter()
            .zip(&self.coefficients)
            .map(|(b, c)| b * c)
            .sum()
    }

    /// Analytic derivative (mM/h)
    pub fn derivative(&self, t_h: f64) -> f64 {
        let [_, b, c, d, e] = self.coefficients;
        b + 2.0 * c * t_h + 3.0 * d * t_h * t_h + e / (t_h + 1.0)
    }

    pub fn contains(&self, t_h: f64) -> bool {
        t_h >= self.t_min_h && t_h <= self.t_max_h
    }

    /// Derivative inside the fitted domain, `None` outside
    pub fn derivative_in_domain(&self, t_h: f64) -> Option<f64> {
        self.contains(t_h).then(|| self.derivative(t_h))
    }
}

fn r_squared(series: &TimeSeries, model: impl Fn(f64) -> f64) -> f64 {
    let n = series.len() as f64;
    let mean = series.values_mM.iter().sum::<f64>() / n;
    let ss_tot: f64 = series.values_mM.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = series
        .times_h
        .iter()
        .zip(&series.values_mM)
        .map(|(t, v)| (v - model(*t)).powi(2))
        .sum();
    if ss_tot <= f64::EPSILON {
        if ss_res <= 1e-12 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Fitted curves indexed like the network's metabolites
#[derive(Debug, Clone, Default)]
pub struct CurveSet {
    curves: Vec<Option<CurveFit>>,
}

impl CurveSet {
    /// No curves: blend and direct laws fall back to kinetics everywhere
    pub fn empty(n_metabolites: usize) -> Self {
        Self {
            curves: vec![None; n_metabolites],
        }
    }

    /// Fit a curve for every curve-reading metabolite that has a series
    ///
    /// A series that cannot be fitted is logged and left without a curve.
    pub fn fit(network: &Network, data: &ExperimentalData) -> Self {
        let mut set = Self::empty(network.n_metabolites());
        for (i, metabolite) in network.metabolites().iter().enumerate() {
            if !metabolite.flux_law.uses_curve() {
                continue;
            }
            let Some(series) = data.series(&metabolite.name) else {
                log::debug!("No experimental series for {}; using kinetics", metabolite.name);
                continue;
            };
            match CurveFit::fit(&metabolite.name, series) {
                Ok(curve) => set.curves[i] = Some(curve),
                Err(e) => log::warn!("{}; {} falls back to kinetics", e, metabolite.name),
            }
        }
        log::info!("Fitted {} experimental curves", set.len());
        set
    }

    pub fn get(&self, index: usize) -> Option<&CurveFit> {
        self.curves.get(index).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CurveFit)> {
        self.curves
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i, c)))
    }

    /// Number of fitted curves
    pub fn len(&self) -> usize {
        self.curves.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace initial conditions of fitted metabolites with the curve at its first time
    pub fn apply_initial_conditions(&self, x0: &mut [f64]) {
        for (i, curve) in self.iter() {
            if i < x0.len() {
                x0[i] = curve.value(curve.t_min_h);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(times: &[f64], f: impl Fn(f64) -> f64) -> TimeSeries {
        TimeSeries {
            times_h: times.to_vec(),
            values_mM: times.iter().map(|&t| f(t)).collect(),
        }
    }

    const TIMES: [f64; 11] = [0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 14.0, 21.0, 28.0, 35.0, 42.0];

    #[test]
    fn test_exact_recovery() {
        let truth = |t: f64| 2.0 + 0.1 * t - 0.002 * t * t + 0.5 * (t + 1.0).ln();
        let fit = CurveFit::fit("LAC", &series(&TIMES, truth)).expect("fit succeeds");
        assert!(fit.r_squared > 0.999999, "R² {}", fit.r_squared);
        for t in [0.5, 13.0, 40.0] {
            assert!((fit.value(t) - truth(t)).abs() < 1e-6);
        }
        let d = fit.derivative(10.0);
        let expected = 0.1 - 0.004 * 10.0 + 0.5 / 11.0;
        assert!((d - expected).abs() < 1e-6, "derivative {} vs {}", d, expected);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let fit = CurveFit::fit("GLC", &series(&TIMES, |t| 30.0 - 6.0 * (1.0 - (-t / 30.0).exp()))).unwrap();
        let h = 1e-5;
        for t in [1.0, 20.0, 41.0] {
            let fd = (fit.value(t + h) - fit.value(t - h)) / (2.0 * h);
            assert!((fd - fit.derivative(t)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_domain() {
        let fit = CurveFit::fit("ATP", &series(&TIMES, |t| 1.8 - 0.01 * t)).unwrap();
        assert!(fit.derivative_in_domain(21.0).is_some());
        assert!(fit.derivative_in_domain(42.0).is_some());
        assert!(fit.derivative_in_domain(42.5).is_none());
    }

    #[test]
    fn test_too_few_points() {
        match CurveFit::fit("ATP", &series(&[0.0, 1.0, 2.0, 3.0], |t| t)) {
            Err(CurveFitError::TooFewPoints { points, required, .. }) => {
                assert_eq!(points, 4);
                assert_eq!(required, MIN_FIT_POINTS);
            }
            other => panic!("expected too few points, got {:?}", other),
        }
    }

    #[test]
    fn test_non_negative_on_domain() {
        // A series that touches zero: least squares would undershoot
        let s = series(&TIMES, |t| if t < 20.0 { 1.0 - t / 20.0 } else { 0.0 });
        let fit = CurveFit::fit("H2O2", &s).unwrap();
        for k in 0..=420 {
            let t = k as f64 * 0.1;
            assert!(fit.value(t) >= -1e-12, "negative at t = {}: {}", t, fit.value(t));
        }
    }
}
