//! Reaction network model.
//!
//! A [`Network`] is loaded once from its text description and shared
//! read-only by every simulation run. It owns:
//! - the ordered metabolite list (state-vector order)
//! - each metabolite's flux-law family and initial concentration
//! - the reactions with their stoichiometry and rate laws
//!
//! Intracellular pH is not a metabolite of the network; the simulator appends
//! it as state component [`Network::ph_index`].

pub mod flux_law;
mod parser;
pub mod rate_law;

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::biochemistry::enzyme::ReactionStoichiometry;
use crate::biochemistry::ph_transport::PHYSIOLOGICAL_PHI;
use crate::error::MalformedNetworkError;

pub use flux_law::{FluxFamily, FluxLaw, RedoxCoupling, SubFlux};
pub use rate_law::{RateLaw, SaturationTerm};

/// Initial concentration of metabolites without an `-INIT` entry (mM)
pub const DEFAULT_INITIAL_MM: f64 = 1.0;

/// Initial H2O2 when not given explicitly (mM)
pub const DEFAULT_INITIAL_H2O2_MM: f64 = 1e-4;

/// Built-in RBC network description
pub const DEFAULT_NETWORK: &str = include_str!("../../data/networks/rbc_brodbar.net");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compartment {
    Internal,
    External,
}

/// One metabolite of the network
#[derive(Debug, Clone, PartialEq)]
pub struct Metabolite {
    pub name: String,
    pub compartment: Compartment,
    pub flux_law: FluxLaw,
    pub initial_mM: f64,
}

impl Metabolite {
    pub fn new(name: &str, compartment: Compartment) -> Self {
        let initial_mM = if name == "H2O2" { DEFAULT_INITIAL_H2O2_MM } else { DEFAULT_INITIAL_MM };
        Self {
            name: name.to_string(),
            compartment,
            flux_law: FluxLaw::Kinetic,
            initial_mM,
        }
    }
}

/// One reaction of the network
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub name: String,
    pub reversible: bool,
    pub stoichiometry: ReactionStoichiometry,
    pub rate_law: RateLaw,
}

/// Loaded, validated reaction network
#[derive(Debug, Clone)]
pub struct Network {
    metabolites: Vec<Metabolite>,
    reactions: Vec<Reaction>,
    metabolite_index: HashMap<String, usize>,
    reaction_index: HashMap<String, usize>,
    /// Per metabolite: (reaction index, net signed coefficient)
    incidence: Vec<Vec<(usize, f64)>>,
}

impl Network {
    /// Parse and validate a network description
    pub fn load(description: &str) -> Result<Self, MalformedNetworkError> {
        let network = parser::build(description)?;
        log::info!(
            "Network loaded: {} metabolites, {} reactions",
            network.n_metabolites(),
            network.reactions.len()
        );
        Ok(network)
    }

    /// Load a network description from a file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, MalformedNetworkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MalformedNetworkError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::load(&text)
    }

    /// The built-in RBC network
    pub fn default_rbc() -> Result<Self, MalformedNetworkError> {
        Self::load(DEFAULT_NETWORK)
    }

    pub(crate) fn assemble(
        metabolites: Vec<Metabolite>,
        reactions: Vec<Reaction>,
        metabolite_index: HashMap<String, usize>,
    ) -> Result<Self, MalformedNetworkError> {
        let reaction_index = reactions
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();

        let mut incidence = vec![Vec::new(); metabolites.len()];
        for (r, reaction) in reactions.iter().enumerate() {
            for (m, coeff) in reaction.stoichiometry.net() {
                incidence[m].push((r, coeff));
            }
            for &(m, _) in &reaction.stoichiometry.substrates {
                if !reaction.rate_law.gates(m) {
                    log::warn!(
                        "Substrate {} of {} is not gated by its rate law and may go negative",
                        metabolites[m].name,
                        reaction.name
                    );
                }
            }
        }

        Ok(Self {
            metabolites,
            reactions,
            metabolite_index,
            reaction_index,
            incidence,
        })
    }

    /// Number of metabolites (state size without pHi)
    pub fn n_metabolites(&self) -> usize {
        self.metabolites.len()
    }

    /// State size including pHi
    pub fn n_state(&self) -> usize {
        self.metabolites.len() + 1
    }

    /// Index of intracellular pH in the state vector
    pub fn ph_index(&self) -> usize {
        self.metabolites.len()
    }

    pub fn metabolites(&self) -> &[Metabolite] {
        &self.metabolites
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn metabolite_index(&self, name: &str) -> Option<usize> {
        self.metabolite_index.get(name).copied()
    }

    pub fn reaction_index(&self, name: &str) -> Option<usize> {
        self.reaction_index.get(name).copied()
    }

    pub fn metabolite(&self, name: &str) -> Option<&Metabolite> {
        self.metabolite_index(name).map(|i| &self.metabolites[i])
    }

    /// Name of a state component, including the trailing pHi
    pub fn state_name(&self, index: usize) -> &str {
        if index == self.ph_index() {
            "pHi"
        } else {
            self.metabolites.get(index).map(|m| m.name.as_str()).unwrap_or("?")
        }
    }

    /// Reactions producing or consuming metabolite `index`, with net coefficients
    pub fn incidence(&self, index: usize) -> &[(usize, f64)] {
        &self.incidence[index]
    }

    /// Metabolites resolved algebraically, with their pools
    pub fn conservation_laws(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.metabolites.iter().enumerate().filter_map(|(i, m)| match &m.flux_law {
            FluxLaw::Conservation { pool } => Some((i, pool.as_slice())),
            _ => None,
        })
    }

    /// Metabolites following each flux-law family
    pub fn family_counts(&self) -> Vec<(FluxFamily, usize)> {
        let mut counts: Vec<(FluxFamily, usize)> = Vec::new();
        for m in &self.metabolites {
            let family = m.flux_law.family();
            match counts.iter_mut().find(|(f, _)| *f == family) {
                Some(entry) => entry.1 += 1,
                None => counts.push((family, 1)),
            }
        }
        counts.sort();
        counts
    }

    /// Initial state vector from the `-INIT` section, with pHi appended
    pub fn initial_state(&self) -> Vec<f64> {
        let mut x: Vec<f64> = self.metabolites.iter().map(|m| m.initial_mM).collect();
        x.push(PHYSIOLOGICAL_PHI);
        x
    }

    /// Override one kinetic parameter
    ///
    /// - `vmax_<RXN>` sets the Vmax of reaction RXN
    /// - `km_<MET>` sets the Km of every saturation term whose numerator is MET
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), MalformedNetworkError> {
        let invalid = |message: &str| MalformedNetworkError::InvalidParameter {
            name: name.to_string(),
            value,
            message: message.to_string(),
        };
        let unknown = || MalformedNetworkError::UnknownParameter { name: name.to_string(), value };

        if let Some(reaction) = name.strip_prefix("vmax_") {
            let idx = self.reaction_index(reaction).ok_or_else(unknown)?;
            if !value.is_finite() || value < 0.0 {
                return Err(invalid("Vmax must be finite and non-negative"));
            }
            self.reactions[idx].rate_law.set_vmax(value);
            Ok(())
        } else if let Some(metabolite) = name.strip_prefix("km_") {
            let idx = self.metabolite_index(metabolite).ok_or_else(unknown)?;
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid("Km must be finite and positive"));
            }
            let mut touched = 0;
            for reaction in &mut self.reactions {
                for term in reaction.rate_law.terms_mut() {
                    if term.numerator == idx {
                        term.km = value;
                        touched += 1;
                    }
                }
            }
            if touched == 0 {
                return Err(unknown());
            }
            Ok(())
        } else {
            Err(unknown())
        }
    }

    /// Current value of a `vmax_`/`km_` parameter (first matching term for Km)
    pub fn parameter(&self, name: &str) -> Option<f64> {
        if let Some(reaction) = name.strip_prefix("vmax_") {
            self.reaction_index(reaction).map(|i| self.reactions[i].rate_law.vmax())
        } else if let Some(metabolite) = name.strip_prefix("km_") {
            let idx = self.metabolite_index(metabolite)?;
            self.reactions
                .iter()
                .flat_map(|r| r.rate_law.terms())
                .find(|t| t.numerator == idx)
                .map(|t| t.km)
        } else {
            None
        }
    }
}
