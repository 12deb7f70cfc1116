//! Statistics of a calibrated optimum.
//!
//! Confidence intervals come from the curvature of the sum of squares:
//!
//! Cov ≈ 2 s² H⁻¹,  s² = SSR / (n − p)
//!
//! with half-width t(1 − α/2, n − p) · sqrt(Cov_ii). When H is not positive
//! definite (flat or noisy directions), a residual bootstrap with short local
//! re-fits gives percentile intervals instead; when that fails too, the
//! interval is (0.5 x, 2 x). All intervals are clipped to the bounds.
//!
//! Sensitivity is the normalized objective derivative |∂f/∂p · p / f|.
//!
//! References:
//! - Bates DM, Watts DG. Nonlinear Regression Analysis. Wiley, 1988, ch. 2
//! - Efron B, Tibshirani RJ. An Introduction to the Bootstrap. 1993, ch. 9
//! - Press WH et al. Numerical Recipes, 3rd ed., §15.6

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::DMatrix;
use rand::prelude::*;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::local::{self, LocalSettings};
use super::{ConfidenceMethod, CrossValidation, CrossValidationFold, Model, Problem};
use crate::config::CalibrationConfig;

/// Local iterations for each bootstrap or cross-validation re-fit
const REFIT_ITERATIONS: usize = 20;

/// Difference pattern for one parameter at the optimum
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stencil {
    /// x ± h
    Central,
    /// x, x + d h, x + 2 d h with d = ±1, pointing into the bounds
    OneSided(i32),
    /// Lower and upper bound coincide
    Pinned,
}

/// Step and pattern for parameter `x` inside `(lower, upper)`
///
/// The step is capped at a quarter of the bound width, so a one-sided
/// pattern always fits from any point within the bounds.
fn stencil(x: f64, rel_step: f64, (lower, upper): (f64, f64)) -> (f64, Stencil) {
    let width = upper - lower;
    if width <= 0.0 {
        return (0.0, Stencil::Pinned);
    }
    let base = if x != 0.0 { x.abs() } else { width };
    let h = (rel_step * base).min(0.25 * width);
    let pattern = if x - h >= lower && x + h <= upper {
        Stencil::Central
    } else if x + 2.0 * h <= upper {
        Stencil::OneSided(1)
    } else {
        Stencil::OneSided(-1)
    };
    (h, pattern)
}

/// Finite-difference Hessian of `objective` at `x`, evaluated only inside `bounds`
///
/// Step i is `rel_step · |x_i|` (`rel_step` times the bound width when x_i
/// is zero). Parameters with room on both sides use central differences;
/// a parameter sitting on a bound uses one-sided differences into the
/// interior. A pinned parameter or a non-finite objective value leaves
/// non-finite entries, which the interval estimate rejects.
pub fn hessian<F>(objective: &F, x: &[f64], f0: f64, rel_step: f64, bounds: &[(f64, f64)]) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let p = x.len();
    let patterns: Vec<(f64, Stencil)> = x.iter().zip(bounds).map(|(x, b)| stencil(*x, rel_step, *b)).collect();
    let direction = |i: usize| match patterns[i].1 {
        Stencil::OneSided(d) => d,
        _ => 1,
    };

    // Displacements in units of each parameter's step
    let mut keys: BTreeSet<Vec<(usize, i32)>> = BTreeSet::new();
    for i in 0..p {
        match patterns[i].1 {
            Stencil::Pinned => continue,
            Stencil::Central => {
                keys.insert(vec![(i, 1)]);
                keys.insert(vec![(i, -1)]);
            }
            Stencil::OneSided(d) => {
                keys.insert(vec![(i, d)]);
                keys.insert(vec![(i, 2 * d)]);
            }
        }
        for j in i + 1..p {
            match (patterns[i].1, patterns[j].1) {
                (_, Stencil::Pinned) => {}
                (Stencil::Central, Stencil::Central) => {
                    for (a, b) in [(1, 1), (1, -1), (-1, 1), (-1, -1)] {
                        keys.insert(vec![(i, a), (j, b)]);
                    }
                }
                _ => {
                    let (di, dj) = (direction(i), direction(j));
                    keys.insert(vec![(i, di), (j, dj)]);
                    keys.insert(vec![(i, di)]);
                    keys.insert(vec![(j, dj)]);
                }
            }
        }
    }
    let keys: Vec<Vec<(usize, i32)>> = keys.into_iter().collect();
    let values: Vec<f64> = keys
        .par_iter()
        .map(|key| {
            let mut point = x.to_vec();
            for &(i, m) in key {
                point[i] += m as f64 * patterns[i].0;
            }
            objective(&point)
        })
        .collect();
    let table: BTreeMap<Vec<(usize, i32)>, f64> = keys.into_iter().zip(values).collect();
    let v = |key: &[(usize, i32)]| table.get(key).copied().unwrap_or(f64::NAN);

    let mut h = DMatrix::from_element(p, p, f64::NAN);
    for i in 0..p {
        let (hi, pattern_i) = patterns[i];
        h[(i, i)] = match pattern_i {
            Stencil::Pinned => f64::NAN,
            Stencil::Central => (v(&[(i, 1)]) - 2.0 * f0 + v(&[(i, -1)])) / (hi * hi),
            Stencil::OneSided(d) => (v(&[(i, 2 * d)]) - 2.0 * v(&[(i, d)]) + f0) / (hi * hi),
        };
        for j in i + 1..p {
            let (hj, pattern_j) = patterns[j];
            let value = match (pattern_i, pattern_j) {
                (Stencil::Pinned, _) | (_, Stencil::Pinned) => f64::NAN,
                (Stencil::Central, Stencil::Central) => {
                    (v(&[(i, 1), (j, 1)]) - v(&[(i, 1), (j, -1)]) - v(&[(i, -1), (j, 1)]) + v(&[(i, -1), (j, -1)]))
                        / (4.0 * hi * hj)
                }
                _ => {
                    let (di, dj) = (direction(i), direction(j));
                    (v(&[(i, di), (j, dj)]) - v(&[(i, di)]) - v(&[(j, dj)]) + f0) / ((di * dj) as f64 * hi * hj)
                }
            };
            h[(i, j)] = value;
            h[(j, i)] = value;
        }
    }
    h
}

/// Quantile of Student's t distribution
pub fn student_t_quantile(probability: f64, dof: f64) -> Option<f64> {
    StudentsT::new(0.0, 1.0, dof).ok().map(|t| t.inverse_cdf(probability))
}

/// Curvature intervals; `None` when H is unusable or there are no spare observations
pub fn hessian_intervals(
    h: &DMatrix<f64>,
    x: &[f64],
    ssr: f64,
    n_observations: usize,
    level: f64,
) -> Option<Vec<(f64, f64)>> {
    let p = x.len();
    if n_observations <= p || h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let inverse = h.clone().cholesky()?.inverse();
    let dof = (n_observations - p) as f64;
    let s2 = ssr / dof;
    let q = student_t_quantile(1.0 - (1.0 - level) / 2.0, dof)?;

    x.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let variance = 2.0 * s2 * inverse[(i, i)];
            if variance.is_finite() && variance >= 0.0 {
                let half = q * variance.sqrt();
                Some((xi - half, xi + half))
            } else {
                None
            }
        })
        .collect()
}

/// (0.5 x, 2 x), ordered for negative values
pub fn heuristic_intervals(x: &[f64]) -> Vec<(f64, f64)> {
    x.iter()
        .map(|&v| {
            let (a, b) = (0.5 * v, 2.0 * v);
            (a.min(b), a.max(b))
        })
        .collect()
}

pub fn clip_to_bounds(intervals: &[(f64, f64)], bounds: &[(f64, f64)]) -> Vec<(f64, f64)> {
    intervals
        .iter()
        .zip(bounds)
        .map(|((lo, hi), (lower, upper))| (lo.clamp(*lower, *upper), hi.clamp(*lower, *upper)))
        .collect()
}

/// Linear-interpolated quantile of sorted values
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let k = position.floor() as usize;
            let w = position - k as f64;
            if k + 1 < n {
                sorted[k] + w * (sorted[k + 1] - sorted[k])
            } else {
                sorted[n - 1]
            }
        }
    }
}

/// Normalized sensitivity |∂f/∂p_i · p_i / f| by one-sided differences inside `bounds`
///
/// The step goes up when there is room and down otherwise. If that trial
/// is non-finite the opposite direction is tried; a parameter with no
/// usable neighbour reports zero.
pub fn sensitivity<F>(objective: &F, x: &[f64], f0: f64, rel_step: f64, bounds: &[(f64, f64)]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    (0..x.len())
        .into_par_iter()
        .map(|i| {
            let (lower, upper) = bounds[i];
            let h = if x[i] != 0.0 { rel_step * x[i].abs() } else { rel_step };
            let (up, down) = ((upper - x[i]).min(h), (x[i] - lower).min(h));
            let difference = |delta: f64| {
                let mut point = x.to_vec();
                point[i] += delta;
                (objective(&point) - f0) / delta
            };

            let mut derivative = f64::NAN;
            if up > 0.0 {
                derivative = difference(up);
            }
            if !derivative.is_finite() && down > 0.0 {
                derivative = difference(-down);
            }
            let s = (derivative * x[i] / (f0 + 1e-10)).abs();
            if s.is_finite() {
                s
            } else {
                0.0
            }
        })
        .collect()
}

/// Coefficient of determination 1 − SS_res / SS_tot
pub fn r_squared(observed: &[f64], simulated: &[f64]) -> f64 {
    if observed.is_empty() {
        return 0.0;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_res: f64 = observed.iter().zip(simulated).map(|(o, s)| (o - s).powi(2)).sum();
    let ss_tot: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
    1.0 - ss_res / (ss_tot + 1e-10)
}

/// Intervals for the optimum `x`, falling back from curvature to bootstrap to heuristic
pub(super) fn confidence_intervals<M: Model + ?Sized>(
    problem: &Problem<'_, M>,
    x: &[f64],
    ssr: f64,
    simulated: Option<&[f64]>,
    config: &CalibrationConfig,
) -> (Vec<(f64, f64)>, ConfidenceMethod) {
    if let Some(simulated) = simulated.filter(|_| ssr < problem.penalty) {
        let h = hessian(&|p: &[f64]| problem.usable_objective(p), x, ssr, config.hessian_step, &problem.bounds);
        if let Some(intervals) = hessian_intervals(&h, x, ssr, problem.n_observations(), config.confidence_level) {
            return (clip_to_bounds(&intervals, &problem.bounds), ConfidenceMethod::Hessian);
        }
        log::info!("Hessian at the optimum is not usable; bootstrapping the intervals");

        if let Some(intervals) = bootstrap_intervals(problem, x, simulated, config) {
            return (clip_to_bounds(&intervals, &problem.bounds), ConfidenceMethod::Bootstrap);
        }
    }
    log::warn!("Confidence intervals fall back to (0.5 x, 2 x)");
    (
        clip_to_bounds(&heuristic_intervals(x), &problem.bounds),
        ConfidenceMethod::Heuristic,
    )
}

/// Percentile intervals from re-fits to resampled residuals
fn bootstrap_intervals<M: Model + ?Sized>(
    problem: &Problem<'_, M>,
    x: &[f64],
    simulated: &[f64],
    config: &CalibrationConfig,
) -> Option<Vec<(f64, f64)>> {
    if config.bootstrap_samples < 2 || simulated.is_empty() {
        return None;
    }
    let residuals: Vec<f64> = problem.observed.iter().zip(simulated).map(|(o, s)| o - s).collect();
    let u0 = problem.to_unit(x);
    let settings = LocalSettings {
        max_iter: config.max_iter.min(REFIT_ITERATIONS),
        ..LocalSettings::default()
    };

    let fits: Vec<Vec<f64>> = (0..config.bootstrap_samples)
        .into_par_iter()
        .filter_map(|b| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(b as u64 + 1));
            let resampled: Vec<f64> = simulated
                .iter()
                .map(|s| s + residuals[rng.gen_range(0..residuals.len())])
                .collect();
            let objective = |u: &[f64]| problem.ssr_against(&problem.to_real(u), &resampled, None);
            let fit = local::minimize(&objective, &u0, &settings);
            (fit.f < problem.penalty).then(|| problem.to_real(&fit.u))
        })
        .collect();
    if fits.len() < 2 {
        return None;
    }
    log::debug!("Bootstrap: {} of {} re-fits usable", fits.len(), config.bootstrap_samples);

    let tail = (1.0 - config.confidence_level) / 2.0;
    Some(
        (0..x.len())
            .map(|i| {
                let mut values: Vec<f64> = fits.iter().map(|fit| fit[i]).collect();
                values.sort_by(f64::total_cmp);
                (percentile(&values, tail), percentile(&values, 1.0 - tail))
            })
            .collect(),
    )
}

/// Leave-one-timepoint-out: re-fit without each measurement time, score the held-out points
pub(super) fn cross_validate<M: Model + ?Sized>(
    problem: &Problem<'_, M>,
    x: &[f64],
    config: &CalibrationConfig,
) -> CrossValidation {
    let u0 = problem.to_unit(x);
    let settings = LocalSettings {
        max_iter: config.max_iter.min(REFIT_ITERATIONS),
        ..LocalSettings::default()
    };

    let folds: Vec<CrossValidationFold> = problem
        .observation_times()
        .into_iter()
        .map(|t| {
            let held_out: Vec<bool> = problem.observations.iter().map(|o| (o.time_h - t).abs() < 1e-9).collect();
            let training: Vec<bool> = held_out.iter().map(|h| !h).collect();
            let objective = |u: &[f64]| problem.ssr_against(&problem.to_real(u), &problem.observed, Some(&training));
            let fit = local::minimize(&objective, &u0, &settings);
            let parameters = problem.to_real(&fit.u);

            let n_held_out = held_out.iter().filter(|h| **h).count();
            let rmse = match problem.simulated(&parameters) {
                Some(s) => {
                    let sq: f64 = s
                        .iter()
                        .zip(&problem.observed)
                        .zip(&held_out)
                        .filter(|(_, h)| **h)
                        .map(|((s, o), _)| (s - o).powi(2))
                        .sum();
                    (sq / n_held_out.max(1) as f64).sqrt()
                }
                None => f64::NAN,
            };
            log::debug!("Cross-validation fold t = {:.2} h: RMSE {:.4e}", t, rmse);
            CrossValidationFold {
                held_out_time_h: t,
                n_held_out,
                rmse,
                parameters,
            }
        })
        .collect();

    let scores: Vec<f64> = folds.iter().map(|f| f.rmse).filter(|r| r.is_finite()).collect();
    let (mean_rmse, std_rmse) = if scores.is_empty() {
        (f64::NAN, f64::NAN)
    } else {
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    };
    log::info!(
        "Leave-one-timepoint-out over {} folds: RMSE {:.4e} ± {:.4e}",
        folds.len(),
        mean_rmse,
        std_rmse
    );
    CrossValidation {
        folds,
        mean_rmse,
        std_rmse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biochemistry::simulation::Trajectory;
    use crate::calibration::{calibrate, CalibrationMethod, FnModel, ParameterSet};
    use crate::error::SimulationError;
    use crate::experimental::ExperimentalData;

    #[test]
    fn test_hessian_of_quadratic() {
        let f = |x: &[f64]| 3.0 * x[0] * x[0] + 2.0 * x[0] * x[1] + 5.0 * x[1] * x[1];
        let x = [1.0, 2.0];
        let h = hessian(&f, &x, f(&x), 1e-4, &[(-10.0, 10.0), (-10.0, 10.0)]);
        assert!((h[(0, 0)] - 6.0).abs() < 1e-4, "{}", h);
        assert!((h[(0, 1)] - 2.0).abs() < 1e-4, "{}", h);
        assert!((h[(1, 0)] - 2.0).abs() < 1e-4, "{}", h);
        assert!((h[(1, 1)] - 10.0).abs() < 1e-4, "{}", h);
    }

    #[test]
    fn test_hessian_at_upper_bound() {
        // Undefined beyond x0 = 1, the upper bound
        let f = |x: &[f64]| {
            if x[0] > 1.0 {
                f64::NAN
            } else {
                2.0 * (x[0] - 3.0).powi(2) + x[0] * x[1] + x[1] * x[1]
            }
        };
        let x = [1.0, 0.5];
        let bounds = [(0.0, 1.0), (-1.0, 1.0)];
        let h = hessian(&f, &x, f(&x), 1e-4, &bounds);
        assert!((h[(0, 0)] - 4.0).abs() < 1e-4, "{}", h);
        assert!((h[(0, 1)] - 1.0).abs() < 1e-4, "{}", h);
        assert!((h[(1, 1)] - 2.0).abs() < 1e-4, "{}", h);
    }

    #[test]
    fn test_hessian_pinned_parameter_unusable() {
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let h = hessian(&f, &[1.0, 1.0], 2.0, 1e-4, &[(1.0, 1.0), (0.0, 2.0)]);
        assert!(h[(0, 0)].is_nan());
        assert!((h[(1, 1)] - 2.0).abs() < 1e-4);
        assert!(hessian_intervals(&h, &[1.0, 1.0], 1.0, 10, 0.95).is_none());
    }

    #[test]
    fn test_sensitivity_steps_inside_bounds() {
        let f = |x: &[f64]| if x[0] > 1.0 { f64::NAN } else { x[0] * x[0] + 1.0 };
        let s = sensitivity(&f, &[1.0], 2.0, 0.01, &[(0.0, 1.0)]);
        // Backward difference 2 - h = 1.99, times x / f = 1 / 2
        assert!((s[0] - 0.995).abs() < 1e-9, "{:?}", s);

        // Upward step lands on an undefined point inside the bounds: step down instead
        let g = |x: &[f64]| if x[0] > 1.0 { f64::NAN } else { x[0] * x[0] + 1.0 };
        let s = sensitivity(&g, &[1.0], 2.0, 0.01, &[(0.0, 5.0)]);
        assert!((s[0] - 0.995).abs() < 1e-9, "{:?}", s);

        let pinned = sensitivity(&g, &[1.0], 2.0, 0.01, &[(1.0, 1.0)]);
        assert_eq!(pinned, vec![0.0]);
    }

    #[test]
    fn test_t_quantiles() {
        let q = student_t_quantile(0.975, 5.0).unwrap();
        assert!((q - 2.5706).abs() < 1e-3, "{}", q);
        let q = student_t_quantile(0.975, 1e6).unwrap();
        assert!((q - 1.96).abs() < 1e-2, "{}", q);
    }

    #[test]
    fn test_indefinite_hessian_rejected() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(hessian_intervals(&h, &[1.0, 1.0], 1.0, 10, 0.95).is_none());
        let h = DMatrix::identity(2, 2);
        assert!(hessian_intervals(&h, &[1.0, 1.0], 1.0, 2, 0.95).is_none());
        assert!(hessian_intervals(&h, &[1.0, 1.0], 1.0, 10, 0.95).is_some());
    }

    #[test]
    fn test_heuristic_and_clip() {
        let ci = clip_to_bounds(&heuristic_intervals(&[2.0, -1.0]), &[(0.0, 3.0), (-10.0, 10.0)]);
        assert_eq!(ci, vec![(1.0, 3.0), (-2.0, -0.5)]);
    }

    #[test]
    fn test_percentile() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 0.5), 3.0);
        assert_eq!(percentile(&v, 1.0), 5.0);
        assert!((percentile(&v, 0.125) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_r_squared() {
        let observed = [1.0, 2.0, 3.0, 4.0];
        assert!((r_squared(&observed, &observed) - 1.0).abs() < 1e-9);
        assert!(r_squared(&observed, &[2.5; 4]) < 1e-9);
    }

    #[test]
    fn test_sensitivity_scaling() {
        // f = p0² + 0.01 p1: the first parameter dominates
        let f = |x: &[f64]| x[0] * x[0] + 0.01 * x[1];
        let x = [2.0, 2.0];
        let s = sensitivity(&f, &x, f(&x), 0.01, &[(0.0, 10.0), (0.0, 10.0)]);
        assert!(s[0] > 10.0 * s[1], "{:?}", s);
        // Forward difference of p0² is 2 p0 + h = 4.02, times p0 / f = 2 / 4.02
        assert!((s[0] - 2.0).abs() < 1e-6, "{:?}", s);
    }

    const TIMES: [f64; 8] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
    const NOISE: [f64; 8] = [0.05, -0.03, 0.02, -0.06, 0.01, 0.04, -0.02, -0.01];

    fn line_model() -> FnModel<impl Fn(&[(&str, f64)]) -> Result<Trajectory, SimulationError> + Sync> {
        FnModel::new(vec!["Y".into()], 7.0, |p: &[(&str, f64)]| {
            let (a, b) = (p[0].1, p[1].1);
            Ok(Trajectory {
                state_names: vec!["Y".into()],
                times_h: TIMES.to_vec(),
                states: TIMES.iter().map(|t| vec![a + b * t]).collect(),
                ..Default::default()
            })
        })
    }

    fn line_data() -> ExperimentalData {
        let values: Vec<f64> = TIMES.iter().zip(NOISE).map(|(t, e)| 1.0 + 0.5 * t + e).collect();
        let mut data = ExperimentalData::new();
        data.insert("Y", &TIMES, &values);
        data
    }

    #[test]
    fn test_intervals_match_linear_regression() {
        let params = ParameterSet::new().with("a", 2.0, 0.0, 5.0).with("b", 1.0, 0.0, 2.0);
        let config = CalibrationConfig {
            method: CalibrationMethod::LeastSquares,
            ..CalibrationConfig::default()
        };
        let result = calibrate(&params, &line_model(), &line_data(), &["Y"], &config).unwrap();
        assert_eq!(result.confidence_method, ConfidenceMethod::Hessian);

        // Ordinary least squares in closed form
        let n = TIMES.len() as f64;
        let y: Vec<f64> = TIMES.iter().zip(NOISE).map(|(t, e)| 1.0 + 0.5 * t + e).collect();
        let t_mean = TIMES.iter().sum::<f64>() / n;
        let y_mean = y.iter().sum::<f64>() / n;
        let sxx: f64 = TIMES.iter().map(|t| (t - t_mean).powi(2)).sum();
        let sxy: f64 = TIMES.iter().zip(&y).map(|(t, y)| (t - t_mean) * (y - y_mean)).sum();
        let b = sxy / sxx;
        let a = y_mean - b * t_mean;
        let ssr: f64 = TIMES.iter().zip(&y).map(|(t, y)| (y - a - b * t).powi(2)).sum();
        let s2 = ssr / (n - 2.0);
        let q = student_t_quantile(0.975, n - 2.0).unwrap();
        let half_b = q * (s2 / sxx).sqrt();

        let fitted = result.parameter("b").unwrap();
        assert!((fitted.value - b).abs() < 1e-6, "b {} vs {}", fitted.value, b);
        assert!((result.value("a").unwrap() - a).abs() < 1e-6);
        let (lo, hi) = fitted.confidence_interval;
        assert!((hi - lo - 2.0 * half_b).abs() < 1e-3 * half_b, "width {} vs {}", hi - lo, 2.0 * half_b);
        assert!(result.r_squared > 0.99);
    }

    #[test]
    fn test_flat_direction_falls_back() {
        // b has no effect, so the curvature is singular
        let model = FnModel::new(vec!["Y".into()], 7.0, |p: &[(&str, f64)]| {
            let a = p[0].1;
            Ok(Trajectory {
                state_names: vec!["Y".into()],
                times_h: TIMES.to_vec(),
                states: TIMES.iter().map(|t| vec![a * (1.0 + t)]).collect(),
                ..Default::default()
            })
        });
        let params = ParameterSet::new().with("a", 1.0, 0.1, 5.0).with("b", 1.0, 0.5, 2.0);
        let config = CalibrationConfig {
            method: CalibrationMethod::Local,
            bootstrap_samples: 8,
            ..CalibrationConfig::default()
        };
        let result = calibrate(&params, &model, &line_data(), &["Y"], &config).unwrap();
        assert_ne!(result.confidence_method, ConfidenceMethod::Hessian);
        for p in &result.parameters {
            let (lo, hi) = p.confidence_interval;
            assert!(lo >= p.lower && hi <= p.upper && lo <= hi, "{:?}", p);
        }
    }

    #[test]
    fn test_cross_validation_folds() {
        let params = ParameterSet::new().with("a", 2.0, 0.0, 5.0).with("b", 1.0, 0.0, 2.0);
        let config = CalibrationConfig {
            method: CalibrationMethod::LeastSquares,
            cross_validate: true,
            ..CalibrationConfig::default()
        };
        let result = calibrate(&params, &line_model(), &line_data(), &["Y"], &config).unwrap();
        let cv = result.cross_validation.expect("cross validation requested");
        assert_eq!(cv.folds.len(), TIMES.len());
        assert!(cv.folds.iter().all(|f| f.n_held_out == 1 && f.rmse.is_finite()));
        assert!(cv.mean_rmse < 0.2, "mean RMSE {}", cv.mean_rmse);
    }
}
