//! Bounded Levenberg-Marquardt on the residual vector, in unit coordinates.
//!
//! Each iteration solves
//!
//! (JᵀJ + λ diag(JᵀJ)) δ = −Jᵀr
//!
//! and projects u + δ back into the cube. A reduced cost accepts the step and
//! relaxes λ by 3; a rejected step multiplies λ by 4. The Jacobian is a
//! forward difference (backward at the upper bound), columns in parallel.
//!
//! References:
//! - Levenberg K. Q Appl Math. 1944;2:164-168
//! - Marquardt DW. J Soc Ind Appl Math. 1963;11:431-441
//! - Nielsen HB. Damping parameter in Marquardt's method. IMM-REP-1999-05, DTU

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use super::Optimum;
use crate::config::CalibrationConfig;

const DAMPING_LIMIT: f64 = 1e12;

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresSettings {
    /// Trial steps allowed
    pub max_iter: usize,
    /// Finite-difference step in unit coordinates
    pub jacobian_step: f64,
    pub initial_damping: f64,
    /// Relative cost reduction that counts as converged
    pub ftol: f64,
    /// Step length (infinity norm) that counts as converged
    pub xtol: f64,
    /// Projected gradient norm that counts as converged
    pub gtol: f64,
}

impl Default for LeastSquaresSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            jacobian_step: 1e-4,
            initial_damping: 1e-3,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

impl LeastSquaresSettings {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            max_iter: config.max_iter,
            ..Self::default()
        }
    }
}

fn sum_of_squares(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Forward-difference Jacobian of `residuals` at `u` (rows: residuals)
pub fn jacobian<F>(residuals: &F, u: &[f64], r0: &[f64], step: f64) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64> + Sync,
{
    let columns: Vec<Vec<f64>> = (0..u.len())
        .into_par_iter()
        .map(|i| {
            let h = if u[i] + step <= 1.0 { step } else { -step };
            let mut p = u.to_vec();
            p[i] += h;
            residuals(&p).iter().zip(r0).map(|(r, r0)| (r - r0) / h).collect()
        })
        .collect();
    DMatrix::from_fn(r0.len(), u.len(), |row, col| columns[col].get(row).copied().unwrap_or(0.0))
}

/// Minimize ½‖r(u)‖² over the unit cube starting at `start`
///
/// The reported objective is ‖r‖², the same scale as the other backends.
pub fn solve<F>(residuals: &F, start: &[f64], settings: &LeastSquaresSettings) -> Optimum
where
    F: Fn(&[f64]) -> Vec<f64> + Sync,
{
    let finish = |u: Vec<f64>, cost: f64, iterations: usize, converged: bool, message: &str| Optimum {
        u,
        f: cost,
        iterations,
        converged,
        message: message.to_string(),
    };

    let n = start.len();
    let mut u: Vec<f64> = start.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    let mut r = residuals(&u);
    let mut cost = sum_of_squares(&r);
    let mut jac = jacobian(residuals, &u, &r, settings.jacobian_step);
    let mut lambda = settings.initial_damping;

    for iteration in 0..settings.max_iter {
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let jtr = &jt * DVector::from_column_slice(&r);

        let projected = u
            .iter()
            .zip(jtr.iter())
            .map(|(u, g)| ((u - 2.0 * g).clamp(0.0, 1.0) - u).abs())
            .fold(0.0, f64::max);
        if projected <= settings.gtol {
            return finish(u, cost, iteration, true, "gradient below tolerance");
        }

        let mut a = jtj.clone();
        for i in 0..n {
            a[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }
        let rhs = -&jtr;
        let delta = match a.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => a.lu().solve(&rhs),
        };
        let Some(delta) = delta else {
            lambda *= 4.0;
            if lambda > DAMPING_LIMIT {
                return finish(u, cost, iteration + 1, false, "damped system is singular");
            }
            continue;
        };

        let trial: Vec<f64> = u.iter().zip(delta.iter()).map(|(u, d)| (u + d).clamp(0.0, 1.0)).collect();
        let step = trial.iter().zip(&u).map(|(t, u)| (t - u).abs()).fold(0.0, f64::max);
        if step <= settings.xtol {
            return finish(u, cost, iteration + 1, true, "step below tolerance");
        }

        let r_trial = residuals(&trial);
        let cost_trial = sum_of_squares(&r_trial);
        if cost_trial < cost {
            let reduction = (cost - cost_trial) / cost;
            u = trial;
            r = r_trial;
            cost = cost_trial;
            lambda = (lambda / 3.0).max(1e-12);
            if reduction <= settings.ftol {
                return finish(u, cost, iteration + 1, true, "relative cost reduction below tolerance");
            }
            jac = jacobian(residuals, &u, &r, settings.jacobian_step);
        } else {
            lambda *= 4.0;
            if lambda > DAMPING_LIMIT {
                return finish(u, cost, iteration + 1, false, "damping limit reached without reducing the cost");
            }
        }
    }

    let message = format!("maximum iterations ({}) reached", settings.max_iter);
    finish(u, cost, settings.max_iter, false, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMES: [f64; 8] = [0.0, 0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0];

    // a = 10 u0, k = 2 u1
    fn decay_residuals(u: &[f64]) -> Vec<f64> {
        let (a, k) = (10.0 * u[0], 2.0 * u[1]);
        TIMES
            .iter()
            .map(|t| a * (-k * t).exp() - 4.0 * (-0.5 * t).exp())
            .collect()
    }

    #[test]
    fn test_jacobian_of_linear_residuals() {
        let r = |u: &[f64]| vec![2.0 * u[0] + u[1], u[0] - 3.0 * u[1]];
        let u = [0.2, 0.3];
        let j = jacobian(&r, &u, &r(&u), 1e-4);
        assert!((j[(0, 0)] - 2.0).abs() < 1e-9 && (j[(0, 1)] - 1.0).abs() < 1e-9);
        assert!((j[(1, 0)] - 1.0).abs() < 1e-9 && (j[(1, 1)] + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recovers_exponential_decay() {
        let result = solve(&decay_residuals, &[0.1, 0.05], &LeastSquaresSettings::default());
        assert!(result.converged, "{}", result.message);
        assert!((10.0 * result.u[0] - 4.0).abs() < 1e-4, "a = {}", 10.0 * result.u[0]);
        assert!((2.0 * result.u[1] - 0.5).abs() < 1e-4, "k = {}", 2.0 * result.u[1]);
        assert!(result.f < 1e-10);
    }

    #[test]
    fn test_respects_bounds() {
        // Best fit wants u0 = 2, outside the cube
        let r = |u: &[f64]| vec![u[0] - 2.0, u[1] - 0.5];
        let result = solve(&r, &[0.5, 0.9], &LeastSquaresSettings::default());
        assert!(result.u[0] <= 1.0 && (result.u[0] - 1.0).abs() < 1e-9, "{:?}", result.u);
        assert!((result.u[1] - 0.5).abs() < 1e-6, "{:?}", result.u);
    }
}
