//! Differential evolution on the unit cube (best1bin).
//!
//! Population of NP = max(popsize · d, 5) members, initialized by Latin
//! hypercube sampling with the starting point as member 0. Each generation
//! draws a dithered weight F ~ U(F_min, F_max) and builds one trial per
//! member:
//!
//! v = x_best + F (x_r1 − x_r2), crossover with probability CR (one
//! component always taken from v), out-of-cube components resampled.
//!
//! Trials are generated in order from a seeded RNG, evaluated in parallel and
//! then selected, so a given seed reproduces the same search regardless of
//! the thread count. The search stops when the spread of the population
//! objectives falls below `tol · |mean|`.
//!
//! References:
//! - Storn R, Price K. J Global Optim. 1997;11:341-359
//! - Das S, Suganthan PN. IEEE Trans Evol Comput. 2011;15:4-31 (dither)

use rand::prelude::*;
use rayon::prelude::*;

use super::local::{self, LocalSettings};
use super::Optimum;
use crate::config::CalibrationConfig;

/// Population search settings
#[derive(Debug, Clone, PartialEq)]
pub struct DeSettings {
    /// Members per parameter
    pub popsize: usize,
    /// Dither range of the differential weight
    pub mutation: (f64, f64),
    /// Crossover probability
    pub recombination: f64,
    /// Relative objective spread that stops the search
    pub tol: f64,
    pub seed: u64,
    pub max_generations: usize,
}

impl Default for DeSettings {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

impl DeSettings {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            popsize: config.popsize,
            mutation: config.mutation,
            recombination: config.recombination,
            tol: config.tol,
            seed: config.seed,
            max_generations: config.max_iter,
        }
    }
}

/// Summary of one generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationReport {
    pub generation: usize,
    pub best_energy: f64,
    pub mean_energy: f64,
    pub spread: f64,
    /// Members replaced by their trial
    pub replaced: usize,
    pub differential_weight: f64,
}

/// Resumable population state
///
/// Cloning the state forks the search: both copies continue identically.
#[derive(Debug, Clone)]
pub struct SearchState {
    population: Vec<Vec<f64>>,
    energies: Vec<f64>,
    best: usize,
    generation: usize,
    rng: StdRng,
    settings: DeSettings,
}

impl SearchState {
    /// Sample and evaluate the initial population
    pub fn new<F>(objective: &F, dimension: usize, initial: Option<&[f64]>, settings: DeSettings) -> Self
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let np = (settings.popsize * dimension).max(5);

        // Latin hypercube: one sample per stratum in every dimension
        let mut population = vec![vec![0.0; dimension]; np];
        for d in 0..dimension {
            let mut strata: Vec<usize> = (0..np).collect();
            strata.shuffle(&mut rng);
            for (member, stratum) in population.iter_mut().zip(strata) {
                member[d] = (stratum as f64 + rng.gen::<f64>()) / np as f64;
            }
        }
        if let Some(x0) = initial {
            population[0] = x0.iter().map(|u| u.clamp(0.0, 1.0)).collect();
        }

        let energies = evaluate(objective, &population);
        let best = argmin(&energies);
        Self {
            population,
            energies,
            best,
            generation: 0,
            rng,
            settings,
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &[Vec<f64>] {
        &self.population
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn best(&self) -> (&[f64], f64) {
        (&self.population[self.best], self.energies[self.best])
    }

    fn mean_and_spread(&self) -> (f64, f64) {
        let n = self.energies.len() as f64;
        let mean = self.energies.iter().sum::<f64>() / n;
        let var = self.energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    pub fn converged(&self) -> bool {
        let (mean, spread) = self.mean_and_spread();
        spread <= self.settings.tol * mean.abs()
    }

    /// Advance one generation
    pub fn step<F>(&mut self, objective: &F) -> GenerationReport
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let np = self.population.len();
        let dimension = self.population[0].len();
        let (f_lo, f_hi) = self.settings.mutation;
        let weight = if f_hi > f_lo { self.rng.gen_range(f_lo..f_hi) } else { f_lo };
        let best = self.population[self.best].clone();

        let mut trials = Vec::with_capacity(np);
        for i in 0..np {
            let (r1, r2) = self.pick_pair(i, np);
            let fill = self.rng.gen_range(0..dimension.max(1));
            let mut trial = self.population[i].clone();
            for k in 0..dimension {
                if k == fill || self.rng.gen::<f64>() < self.settings.recombination {
                    let v = best[k] + weight * (self.population[r1][k] - self.population[r2][k]);
                    trial[k] = if (0.0..=1.0).contains(&v) { v } else { self.rng.gen::<f64>() };
                }
            }
            trials.push(trial);
        }

        let trial_energies = evaluate(objective, &trials);
        let mut replaced = 0;
        for (i, (trial, energy)) in trials.into_iter().zip(trial_energies).enumerate() {
            if energy < self.energies[i] {
                self.population[i] = trial;
                self.energies[i] = energy;
                replaced += 1;
            }
        }
        self.best = argmin(&self.energies);
        self.generation += 1;

        let (mean_energy, spread) = self.mean_and_spread();
        GenerationReport {
            generation: self.generation,
            best_energy: self.energies[self.best],
            mean_energy,
            spread,
            replaced,
            differential_weight: weight,
        }
    }

    /// Step until converged or out of generations; true when converged
    pub fn run<F>(&mut self, objective: &F) -> bool
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        while self.generation < self.settings.max_generations {
            let report = self.step(objective);
            log::debug!(
                "DE generation {}: best {:.4e}, mean {:.4e}, {} replaced (F = {:.2})",
                report.generation,
                report.best_energy,
                report.mean_energy,
                report.replaced,
                report.differential_weight
            );
            if self.converged() {
                return true;
            }
        }
        false
    }

    /// Two distinct members other than `i`
    fn pick_pair(&mut self, i: usize, np: usize) -> (usize, usize) {
        let mut others = (0..np).filter(|&j| j != i).collect::<Vec<_>>();
        others.shuffle(&mut self.rng);
        match others.len() {
            0 => (i, i),
            1 => (others[0], others[0]),
            _ => (others[0], others[1]),
        }
    }
}

fn evaluate<F>(objective: &F, members: &[Vec<f64>]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    members
        .par_iter()
        .map(|u| {
            let e = objective(u);
            if e.is_nan() {
                f64::INFINITY
            } else {
                e
            }
        })
        .collect()
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Population search from `initial`, polished locally when configured
pub fn optimize<F>(objective: &F, initial: &[f64], config: &CalibrationConfig) -> Optimum
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let settings = DeSettings::from_config(config);
    let mut state = SearchState::new(objective, initial.len(), Some(initial), settings);
    let converged = state.run(objective);
    let (u, f) = state.best();
    let mut optimum = Optimum {
        u: u.to_vec(),
        f,
        iterations: state.generation(),
        converged,
        message: if converged {
            "population converged".to_string()
        } else {
            format!("maximum generations ({}) reached", config.max_iter)
        },
    };

    if config.polish {
        let polished = local::minimize(objective, &optimum.u, &LocalSettings::from_config(config));
        if polished.f < optimum.f {
            log::debug!("Polish improved the objective {:.4e} -> {:.4e}", optimum.f, polished.f);
            optimum.u = polished.u;
            optimum.f = polished.f;
        }
    }
    optimum
}
