//! Adaptive ODE integration for the metabolic network.
//!
//! Three methods share one driver:
//! - `Adaptive`: Dormand-Prince 5(4) with FSAL, PI step control and Hairer's
//!   stiffness detection
//! - `Stiff`: variable-step BDF2 started with one backward-Euler step,
//!   simplified Newton with a finite-difference Jacobian and nalgebra LU
//! - `Auto`: Dormand-Prince until stiffness has been detected on 15 accepted
//!   steps, then BDF2 for the rest of the run
//!
//! A failed run (step size underflow, step budget, non-finite state, Newton
//! failure) is retried once from the initial state with `Stiff` before the
//! failure is returned.
//!
//! Output is sampled on an evenly spaced grid by cubic Hermite interpolation
//! between accepted steps, so the step sequence does not depend on the grid.
//!
//! References:
//! - Hairer E, Nørsett SP, Wanner G. Solving ODEs I. 2nd ed. Springer, 1993 (DOPRI5, stiffness test)
//! - Hairer E, Wanner G. Solving ODEs II. 2nd ed. Springer, 1996 (BDF, simplified Newton)
//! - Shampine LF, Reichelt MW. SIAM J Sci Comput. 1997;18:1-22 (variable-step BDF2)

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Right-hand side `dx/dt = f(t, x)` of an ODE system
pub trait OdeSystem {
    /// Number of state components
    fn dimension(&self) -> usize;

    /// Evaluate `f(t, x)` into `dxdt`
    fn rhs(&mut self, t_h: f64, x: &[f64], dxdt: &mut [f64]);

    /// Called after every accepted step; may rewrite algebraic components
    fn on_accepted_step(&mut self, _t_h: f64, _x: &mut [f64]) {}

    /// Whether component `i` is set by `on_accepted_step` rather than integrated
    ///
    /// Algebraic components take no part in error control or Newton convergence.
    fn is_algebraic(&self, _i: usize) -> bool {
        false
    }

    /// Called before a stiff retry restarts from the initial state
    fn on_restart(&mut self) {}
}

/// Integration method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverMethod {
    /// Explicit until stiffness is detected, implicit afterwards
    #[default]
    Auto,
    /// Dormand-Prince 5(4)
    Adaptive,
    /// Variable-step BDF2
    Stiff,
}

impl SolverMethod {
    pub fn label(&self) -> &'static str {
        match self {
            SolverMethod::Auto => "auto",
            SolverMethod::Adaptive => "adaptive",
            SolverMethod::Stiff => "stiff",
        }
    }
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SolverMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "lsoda" => Ok(SolverMethod::Auto),
            "adaptive" | "rk45" | "dopri5" => Ok(SolverMethod::Adaptive),
            "stiff" | "bdf" => Ok(SolverMethod::Stiff),
            other => Err(format!("unknown solver method '{}' (expected auto, adaptive or stiff)", other)),
        }
    }
}

/// Tolerances, budgets and output density
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Budget of step attempts, accepted and rejected
    pub max_steps: usize,
    /// Largest step (hours)
    pub max_step_h: f64,
    /// Smallest step before the run is declared failed (hours)
    pub min_step_h: f64,
    /// Evenly spaced output times including both ends
    pub n_output_points: usize,
    /// Consecutive stiff steps that trigger the switch in `Auto`
    pub stiffness_threshold: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-8,
            max_steps: 100_000,
            max_step_h: 0.5,
            min_step_h: 1e-10,
            n_output_points: 75,
            stiffness_threshold: 15,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(format!("rtol must be finite and positive, got {}", self.rtol));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(format!("atol must be finite and positive, got {}", self.atol));
        }
        if self.max_steps == 0 {
            return Err("max_steps must be positive".into());
        }
        if !(self.max_step_h > 0.0) || !(self.min_step_h > 0.0) || self.min_step_h >= self.max_step_h {
            return Err(format!(
                "step bounds must satisfy 0 < min_step_h < max_step_h, got {} and {}",
                self.min_step_h, self.max_step_h
            ));
        }
        if self.n_output_points < 2 {
            return Err(format!("n_output_points must be at least 2, got {}", self.n_output_points));
        }
        Ok(())
    }
}

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub lu_decompositions: usize,
    pub newton_failures: usize,
    /// Time at which `Auto` switched to BDF2
    pub stiff_switch_h: Option<f64>,
    /// The run was restarted with `Stiff` after a failure
    pub retried_stiff: bool,
    /// Method that produced the returned result
    pub final_method: SolverMethod,
}

/// Sampled solution of a successful run
#[derive(Debug, Clone)]
pub struct Solution {
    pub times_h: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub stats: SolverStats,
}

/// A run that could not reach the end of its time span
#[derive(Debug, Clone)]
pub struct SolverFailure {
    /// Time of the last accepted step
    pub time_h: f64,
    /// State at the last accepted step
    pub last_state: Vec<f64>,
    pub method: SolverMethod,
    pub reason: String,
    /// Output samples produced before the failure
    pub times_h: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub stats: SolverStats,
}

/// Evenly spaced output times over `[t0, t1]`
pub fn output_grid(t0_h: f64, t1_h: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![t1_h];
    }
    let dt = (t1_h - t0_h) / (n - 1) as f64;
    (0..n)
        .map(|k| if k == n - 1 { t1_h } else { t0_h + dt * k as f64 })
        .collect()
}

/// Cubic Hermite interpolation between two accepted steps
pub fn hermite(t_h: f64, (ta, xa, fa): (f64, &[f64], &[f64]), (tb, xb, fb): (f64, &[f64], &[f64])) -> Vec<f64> {
    let h = tb - ta;
    if h <= 0.0 {
        return xb.to_vec();
    }
    let s = (t_h - ta) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    (0..xa.len())
        .map(|i| h00 * xa[i] + h10 * h * fa[i] + h01 * xb[i] + h11 * h * fb[i])
        .collect()
}

/// Integrate `system` from `x0` over `span`
///
/// Retries once with `Stiff` when a non-stiff or automatic run fails.
pub fn integrate<S: OdeSystem + ?Sized>(
    system: &mut S,
    x0: &[f64],
    span: (f64, f64),
    method: SolverMethod,
    options: &SolverOptions,
) -> Result<Solution, SolverFailure> {
    let mut driver = Driver::new(system, options, span);
    match driver.run(x0, method) {
        Ok(()) => Ok(driver.into_solution(method)),
        Err(failure) if method != SolverMethod::Stiff => {
            log::warn!(
                "{} integration failed at t = {:.4} h ({}); retrying with stiff",
                method,
                failure.time_h,
                failure.reason
            );
            driver.restart();
            driver.stats.retried_stiff = true;
            match driver.run(x0, SolverMethod::Stiff) {
                Ok(()) => Ok(driver.into_solution(SolverMethod::Stiff)),
                Err(failure) => Err(driver.into_failure(failure, SolverMethod::Stiff)),
            }
        }
        Err(failure) => Err(driver.into_failure(failure, method)),
    }
}

/// Where and why a single attempt stopped
struct StepFailure {
    time_h: f64,
    state: Vec<f64>,
    reason: String,
}

/// Outcome of the explicit phase
enum ExplicitEnd {
    Finished,
    Stiff { t_h: f64, x: Vec<f64>, f: Vec<f64>, h: f64 },
}

// Dormand-Prince 5(4) tableau
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

/// h·|λ| above which a Dormand-Prince step counts as stiff
const STIFF_HLAMBDA: f64 = 3.25;
/// Non-stiff steps that reset the stiffness counter
const NONSTIFF_RESET: usize = 6;

const SAFETY: f64 = 0.9;
const PI_ALPHA: f64 = 0.17;
const PI_BETA: f64 = 0.04;

const MAX_NEWTON_ITERATIONS: usize = 7;
const NEWTON_TOL: f64 = 0.03;
/// Accepted BDF steps between Jacobian refreshes
const JACOBIAN_MAX_AGE: usize = 20;
/// Largest BDF step ratio (zero-stability of variable-step BDF2)
const BDF_MAX_RATIO: f64 = 2.0;

struct Driver<'a, S: OdeSystem + ?Sized> {
    system: &'a mut S,
    options: &'a SolverOptions,
    span: (f64, f64),
    stats: SolverStats,
    grid: Vec<f64>,
    next_output: usize,
    times_h: Vec<f64>,
    states: Vec<Vec<f64>>,
    /// Step attempts made before the current run started
    attempts_before_run: usize,
    /// Components that enter the error norms
    controlled: Vec<bool>,
}

impl<'a, S: OdeSystem + ?Sized> Driver<'a, S> {
    fn new(system: &'a mut S, options: &'a SolverOptions, span: (f64, f64)) -> Self {
        let controlled = (0..system.dimension()).map(|i| !system.is_algebraic(i)).collect();
        Self {
            controlled,
            system,
            options,
            span,
            stats: SolverStats::default(),
            grid: output_grid(span.0, span.1, options.n_output_points),
            next_output: 0,
            times_h: Vec::new(),
            states: Vec::new(),
            attempts_before_run: 0,
        }
    }

    fn restart(&mut self) {
        self.system.on_restart();
        self.next_output = 0;
        self.times_h.clear();
        self.states.clear();
    }

    fn into_solution(mut self, method: SolverMethod) -> Solution {
        self.stats.final_method = method;
        Solution {
            times_h: self.times_h,
            states: self.states,
            stats: self.stats,
        }
    }

    fn into_failure(mut self, failure: StepFailure, method: SolverMethod) -> SolverFailure {
        self.stats.final_method = method;
        SolverFailure {
            time_h: failure.time_h,
            last_state: failure.state,
            method,
            reason: failure.reason,
            times_h: self.times_h,
            states: self.states,
            stats: self.stats,
        }
    }

    #[inline]
    fn rhs(&mut self, t_h: f64, x: &[f64], dxdt: &mut [f64]) {
        self.stats.rhs_evaluations += 1;
        self.system.rhs(t_h, x, dxdt);
    }

    fn budget_exhausted(&self) -> bool {
        self.stats.accepted_steps + self.stats.rejected_steps - self.attempts_before_run >= self.options.max_steps
    }

    /// Weighted RMS norm of `v` against the tolerance scale of `a` and `b`
    fn wrms(&self, v: &[f64], a: &[f64], b: &[f64]) -> f64 {
        let mut n = 0usize;
        let sum: f64 = v
            .iter()
            .zip(a.iter().zip(b))
            .zip(&self.controlled)
            .filter(|(_, controlled)| **controlled)
            .map(|((vi, (ai, bi)), _)| {
                n += 1;
                let sc = self.options.atol + self.options.rtol * ai.abs().max(bi.abs());
                (vi / sc).powi(2)
            })
            .sum();
        (sum / n.max(1) as f64).sqrt()
    }

    /// Record every output time in `(ta, tb]` (and `ta` itself on the first call)
    fn emit(&mut self, a: (f64, &[f64], &[f64]), b: (f64, &[f64], &[f64])) {
        let eps = 1e-12 * b.0.abs().max(1.0);
        while self.next_output < self.grid.len() && self.grid[self.next_output] <= b.0 + eps {
            let t = self.grid[self.next_output];
            let x = if (t - b.0).abs() <= eps {
                b.1.to_vec()
            } else if (t - a.0).abs() <= eps {
                a.1.to_vec()
            } else {
                hermite(t, a, b)
            };
            self.times_h.push(t);
            self.states.push(x);
            self.next_output += 1;
        }
    }

    fn initial_step(&self) -> f64 {
        ((self.span.1 - self.span.0) * 1e-5)
            .max(self.options.min_step_h * 10.0)
            .min(self.options.max_step_h)
    }

    fn run(&mut self, x0: &[f64], method: SolverMethod) -> Result<(), StepFailure> {
        let (t0, t1) = self.span;
        let n = self.system.dimension();
        if x0.len() != n {
            return Err(StepFailure {
                time_h: t0,
                state: x0.to_vec(),
                reason: format!("initial state has {} components, system has {}", x0.len(), n),
            });
        }

        self.attempts_before_run = self.stats.accepted_steps + self.stats.rejected_steps;
        let mut x = x0.to_vec();
        self.system.on_accepted_step(t0, &mut x);
        let mut f = vec![0.0; n];
        self.rhs(t0, &x, &mut f);
        self.emit((t0, &x, &f), (t0, &x, &f));
        if t1 <= t0 {
            return Ok(());
        }

        log::debug!("Integrating {} components over {:.2}-{:.2} h with {}", n, t0, t1, method);
        let h0 = self.initial_step();
        match method {
            SolverMethod::Stiff => self.bdf(t0, x, f, h0),
            SolverMethod::Adaptive | SolverMethod::Auto => {
                let detect = method == SolverMethod::Auto;
                match self.dormand_prince(t0, x, f, h0, detect)? {
                    ExplicitEnd::Finished => Ok(()),
                    ExplicitEnd::Stiff { t_h, x, f, h } => {
                        log::info!("Stiffness detected at t = {:.4} h; switching to BDF2", t_h);
                        self.stats.stiff_switch_h = Some(t_h);
                        self.bdf(t_h, x, f, h)
                    }
                }
            }
        }
    }

    fn dormand_prince(
        &mut self,
        mut t: f64,
        mut x: Vec<f64>,
        mut k1: Vec<f64>,
        mut h: f64,
        switch_on_stiffness: bool,
    ) -> Result<ExplicitEnd, StepFailure> {
        let t1 = self.span.1;
        let n = x.len();
        let mut k2 = vec![0.0; n];
        let mut k3 = vec![0.0; n];
        let mut k4 = vec![0.0; n];
        let mut k5 = vec![0.0; n];
        let mut k6 = vec![0.0; n];
        let mut k7 = vec![0.0; n];
        let mut y_stage = vec![0.0; n];
        let mut y_new = vec![0.0; n];
        let mut err_vec = vec![0.0; n];
        let mut err_old: f64 = 1e-4;
        let mut stiff_count = 0usize;
        let mut nonstiff_count = 0usize;
        let mut warned_stiff = false;

        while t < t1 {
            if self.budget_exhausted() {
                return Err(self.budget_failure(t, &x));
            }
            h = h.min(self.options.max_step_h);
            let last = t + h >= t1 - 1e-12 * t1.abs().max(1.0);
            if last {
                h = t1 - t;
            }

            for i in 0..n {
                y_stage[i] = x[i] + h * A21 * k1[i];
            }
            self.rhs(t + C2 * h, &y_stage, &mut k2);
            for i in 0..n {
                y_stage[i] = x[i] + h * (A31 * k1[i] + A32 * k2[i]);
            }
            self.rhs(t + C3 * h, &y_stage, &mut k3);
            for i in 0..n {
                y_stage[i] = x[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
            }
            self.rhs(t + C4 * h, &y_stage, &mut k4);
            for i in 0..n {
                y_stage[i] = x[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
            }
            self.rhs(t + C5 * h, &y_stage, &mut k5);
            for i in 0..n {
                y_stage[i] = x[i] + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
            }
            self.rhs(t + h, &y_stage, &mut k6);
            for i in 0..n {
                y_new[i] = x[i] + h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
            }
            self.rhs(t + h, &y_new, &mut k7);

            for i in 0..n {
                err_vec[i] = h * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            }
            let mut err = self.wrms(&err_vec, &x, &y_new);
            if !err.is_finite() || y_new.iter().any(|v| !v.is_finite()) {
                err = f64::INFINITY;
            }

            let fac11 = err.powf(PI_ALPHA);
            if err <= 1.0 {
                // Hairer's test: h·|λ| estimated from the last two stages at t + h
                let num: f64 = k7.iter().zip(&k6).map(|(a, b)| (a - b).powi(2)).sum();
                let den: f64 = y_new.iter().zip(&y_stage).map(|(a, b)| (a - b).powi(2)).sum();
                let stiff_step = den > 0.0 && h * (num / den).sqrt() > STIFF_HLAMBDA;

                let t_prev = t;
                let x_prev = std::mem::replace(&mut x, y_new.clone());
                let f_prev = std::mem::replace(&mut k1, k7.clone());
                t = if last { t1 } else { t + h };
                self.stats.accepted_steps += 1;
                self.system.on_accepted_step(t, &mut x);
                self.emit((t_prev, &x_prev, &f_prev), (t, &x, &k1));

                let fac = (fac11 / err_old.powf(PI_BETA) / SAFETY).clamp(0.1, 5.0);
                err_old = err.max(1e-4);
                let h_next = h / fac;

                if stiff_step {
                    nonstiff_count = 0;
                    stiff_count += 1;
                    if stiff_count >= self.options.stiffness_threshold {
                        if switch_on_stiffness && t < t1 {
                            return Ok(ExplicitEnd::Stiff { t_h: t, x, f: k1, h: h_next });
                        }
                        if !warned_stiff {
                            log::warn!("Problem appears stiff at t = {:.4} h; consider the stiff method", t);
                            warned_stiff = true;
                        }
                    }
                } else {
                    nonstiff_count += 1;
                    if nonstiff_count >= NONSTIFF_RESET {
                        stiff_count = 0;
                    }
                }
                h = h_next;
            } else {
                self.stats.rejected_steps += 1;
                let fac = if err.is_finite() { (fac11 / SAFETY).min(5.0) } else { 5.0 };
                h /= fac;
                if h < self.options.min_step_h {
                    return Err(StepFailure {
                        time_h: t,
                        state: x,
                        reason: format!("step size underflow (h = {:.3e} h)", h),
                    });
                }
            }
        }
        Ok(ExplicitEnd::Finished)
    }

    /// Forward-difference Jacobian of the right-hand side at `(t, x)`
    fn jacobian(&mut self, t: f64, x: &[f64], f: &[f64]) -> DMatrix<f64> {
        let n = x.len();
        let mut jac = DMatrix::zeros(n, n);
        let mut xp = x.to_vec();
        let mut fp = vec![0.0; n];
        let sqrt_eps = f64::EPSILON.sqrt();
        for j in 0..n {
            let orig = xp[j];
            let delta = sqrt_eps * orig.abs().max(1e-5);
            xp[j] = orig + delta;
            self.rhs(t, &xp, &mut fp);
            xp[j] = orig;
            for i in 0..n {
                jac[(i, j)] = (fp[i] - f[i]) / delta;
            }
        }
        self.stats.jacobian_evaluations += 1;
        jac
    }

    fn bdf(&mut self, mut t: f64, mut x: Vec<f64>, mut f: Vec<f64>, mut h: f64) -> Result<(), StepFailure> {
        let t1 = self.span.1;
        let n = x.len();
        let mut history: Option<(f64, Vec<f64>)> = None;
        let mut jacobian: Option<DMatrix<f64>> = None;
        let mut jacobian_age = 0usize;
        let mut fy = vec![0.0; n];
        let mut psi = vec![0.0; n];
        let mut y_pred = vec![0.0; n];
        let mut err_vec = vec![0.0; n];

        while t < t1 {
            if self.budget_exhausted() {
                return Err(self.budget_failure(t, &x));
            }
            h = h.min(self.options.max_step_h);
            let last = t + h >= t1 - 1e-12 * t1.abs().max(1.0);
            if last {
                h = t1 - t;
            }

            // BDF1 on the first step, BDF2 afterwards
            let (order, gamma, error_constant) = match &history {
                None => {
                    for i in 0..n {
                        psi[i] = x[i];
                        y_pred[i] = x[i] + h * f[i];
                    }
                    (1, 1.0, 0.5)
                }
                Some((t_prev, x_prev)) => {
                    let h_prev = t - t_prev;
                    let w = h / h_prev;
                    let denom = 1.0 + 2.0 * w;
                    for i in 0..n {
                        psi[i] = ((1.0 + w).powi(2) * x[i] - w * w * x_prev[i]) / denom;
                        // Quadratic through x_prev, x and f
                        let a = (x_prev[i] - x[i] + f[i] * h_prev) / (h_prev * h_prev);
                        y_pred[i] = x[i] + f[i] * h + a * h * h;
                    }
                    (2, (1.0 + w) / denom, 0.4)
                }
            };

            let jac = match jacobian.take() {
                Some(jac) => jac,
                None => {
                    jacobian_age = 0;
                    self.jacobian(t, &x, &f)
                }
            };
            let gh = gamma * h;
            let lu = (DMatrix::<f64>::identity(n, n) - &jac * gh).lu();
            self.stats.lu_decompositions += 1;
            jacobian = Some(jac);

            // Simplified Newton on y - psi - γh f(t + h, y) = 0
            let t_new = t + h;
            let mut y = y_pred.clone();
            let mut converged = false;
            let mut previous_norm = f64::INFINITY;
            for _ in 0..MAX_NEWTON_ITERATIONS {
                self.rhs(t_new, &y, &mut fy);
                let residual = DVector::from_iterator(n, (0..n).map(|i| psi[i] + gh * fy[i] - y[i]));
                let Some(delta) = lu.solve(&residual) else {
                    break;
                };
                for i in 0..n {
                    y[i] += delta[i];
                }
                let norm = self.wrms(delta.as_slice(), &y, &x);
                if !norm.is_finite() || norm > 2.0 * previous_norm {
                    break;
                }
                if norm < NEWTON_TOL {
                    converged = true;
                    break;
                }
                previous_norm = norm;
            }

            if !converged || y.iter().any(|v| !v.is_finite()) {
                self.stats.newton_failures += 1;
                self.stats.rejected_steps += 1;
                if jacobian_age > 0 {
                    jacobian = None;
                } else {
                    h *= 0.25;
                }
                if h < self.options.min_step_h {
                    return Err(StepFailure {
                        time_h: t,
                        state: x,
                        reason: format!("Newton iteration failed to converge (h = {:.3e} h)", h),
                    });
                }
                continue;
            }

            for i in 0..n {
                err_vec[i] = error_constant * (y[i] - y_pred[i]);
            }
            let err = self.wrms(&err_vec, &x, &y);
            let exponent = -1.0 / (order as f64 + 1.0);

            if err <= 1.0 {
                let t_prev = t;
                let x_prev = std::mem::replace(&mut x, y);
                let f_prev = f.clone();
                t = if last { t1 } else { t_new };
                self.stats.accepted_steps += 1;
                self.system.on_accepted_step(t, &mut x);
                self.rhs(t, &x, &mut f);
                self.emit((t_prev, &x_prev, &f_prev), (t, &x, &f));
                history = Some((t_prev, x_prev));

                jacobian_age += 1;
                if jacobian_age >= JACOBIAN_MAX_AGE {
                    jacobian = None;
                }
                let factor = if err > 0.0 { SAFETY * err.powf(exponent) } else { BDF_MAX_RATIO };
                h *= factor.clamp(0.2, BDF_MAX_RATIO);
            } else {
                self.stats.rejected_steps += 1;
                h *= (SAFETY * err.powf(exponent)).clamp(0.2, 0.9);
                if h < self.options.min_step_h {
                    return Err(StepFailure {
                        time_h: t,
                        state: x,
                        reason: format!("step size underflow (h = {:.3e} h)", h),
                    });
                }
            }
        }
        Ok(())
    }

    fn budget_failure(&self, t: f64, x: &[f64]) -> StepFailure {
        StepFailure {
            time_h: t,
            state: x.to_vec(),
            reason: format!("step budget of {} attempts exhausted", self.options.max_steps),
        }
    }
}
