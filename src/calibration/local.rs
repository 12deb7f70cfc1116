//! Bound-constrained local minimization on the unit cube.
//!
//! Projected gradient descent with Barzilai-Borwein step lengths and an
//! Armijo backtracking line search. Gradients are central differences
//! (one-sided at a bound), evaluated in parallel.
//!
//! References:
//! - Barzilai J, Borwein JM. IMA J Numer Anal. 1988;8:141-148
//! - Birgin EG, Martínez JM, Raydan M. SIAM J Optim. 2000;10:1196-1211

use rayon::prelude::*;

use super::Optimum;
use crate::config::CalibrationConfig;

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;
const MIN_STEP: f64 = 1e-10;
const MAX_STEP: f64 = 1e3;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalSettings {
    pub max_iter: usize,
    /// Finite-difference step in unit coordinates
    pub gradient_step: f64,
    /// Projected-gradient norm that counts as stationary
    pub gtol: f64,
    /// Relative objective decrease that counts as stalled
    pub ftol: f64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            gradient_step: 1e-4,
            gtol: 1e-8,
            ftol: 1e-9,
        }
    }
}

impl LocalSettings {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            max_iter: config.max_iter,
            ..Self::default()
        }
    }
}

fn project(u: &[f64]) -> Vec<f64> {
    u.iter().map(|v| v.clamp(0.0, 1.0)).collect()
}

/// Finite-difference gradient of `objective` at `u`
pub fn gradient<F>(objective: &F, u: &[f64], f0: f64, step: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    (0..u.len())
        .into_par_iter()
        .map(|i| {
            let shifted = |delta: f64| {
                let mut p = u.to_vec();
                p[i] += delta;
                objective(&p)
            };
            let up = u[i] + step <= 1.0;
            let down = u[i] - step >= 0.0;
            match (up, down) {
                (true, true) => (shifted(step) - shifted(-step)) / (2.0 * step),
                (true, false) => (shifted(step) - f0) / step,
                (false, true) => (f0 - shifted(-step)) / step,
                (false, false) => 0.0,
            }
        })
        .collect()
}

/// Infinity norm of the projected gradient step
fn projected_gradient_norm(u: &[f64], g: &[f64]) -> f64 {
    u.iter()
        .zip(g)
        .map(|(u, g)| ((u - g).clamp(0.0, 1.0) - u).abs())
        .fold(0.0, f64::max)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// Minimize `objective` over the unit cube starting at `start`
pub fn minimize<F>(objective: &F, start: &[f64], settings: &LocalSettings) -> Optimum
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let mut u = project(start);
    let mut f = objective(&u);
    let mut g = gradient(objective, &u, f, settings.gradient_step);
    let g_max = g.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let mut alpha = if g_max > 0.0 {
        (0.1 / g_max).clamp(MIN_STEP, MAX_STEP)
    } else {
        1.0
    };

    for iteration in 0..settings.max_iter {
        if projected_gradient_norm(&u, &g) <= settings.gtol {
            return Optimum {
                u,
                f,
                iterations: iteration,
                converged: true,
                message: "projected gradient below tolerance".into(),
            };
        }

        let mut step_length = alpha;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = project(&u.iter().zip(&g).map(|(u, g)| u - step_length * g).collect::<Vec<_>>());
            let direction: Vec<f64> = trial.iter().zip(&u).map(|(t, u)| t - u).collect();
            let slope = dot(&g, &direction);
            if slope >= 0.0 {
                break;
            }
            let f_trial = objective(&trial);
            if f_trial <= f + ARMIJO_C1 * slope {
                accepted = Some((trial, f_trial));
                break;
            }
            step_length *= 0.5;
        }

        let Some((u_next, f_next)) = accepted else {
            return Optimum {
                u,
                f,
                iterations: iteration,
                converged: false,
                message: "line search could not reduce the objective".into(),
            };
        };

        let stalled = (f - f_next) <= settings.ftol * f.abs().max(f_next.abs()).max(1.0);
        let g_next = gradient(objective, &u_next, f_next, settings.gradient_step);

        let s: Vec<f64> = u_next.iter().zip(&u).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_next.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        alpha = if sy > 0.0 {
            (dot(&s, &s) / sy).clamp(MIN_STEP, MAX_STEP)
        } else {
            (step_length * 2.0).clamp(MIN_STEP, MAX_STEP)
        };

        u = u_next;
        f = f_next;
        g = g_next;

        if stalled {
            return Optimum {
                u,
                f,
                iterations: iteration + 1,
                converged: true,
                message: "relative reduction of the objective below tolerance".into(),
            };
        }
    }

    Optimum {
        u,
        f,
        iterations: settings.max_iter,
        converged: false,
        message: format!("maximum iterations ({}) reached", settings.max_iter),
    }
}
