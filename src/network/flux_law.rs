//! Per-metabolite flux-law families.
//!
//! Each metabolite's derivative follows exactly one [`FluxLaw`], chosen when
//! the network is loaded. The evaluator dispatches on the variant once per
//! metabolite per right-hand-side call.

use serde::Serialize;

/// A named building block for the switch and hybrid families
#[derive(Debug, Clone, PartialEq)]
pub enum SubFlux {
    /// Net stoichiometric flux from the reaction network
    Kinetic,
    /// Kinetic flux multiplied by a constant
    Scaled { factor: f64 },
    /// First-order relaxation toward a set level: rate * (target - x)
    Relaxation { target_mM: f64, rate_per_h: f64 },
}

/// Redox coupling parameters for the enhanced redox family
#[derive(Debug, Clone, PartialEq)]
pub struct RedoxCoupling {
    /// pH optimum of the extra Hill modulation
    pub ph_opt: f64,
    /// Hill coefficient of the extra modulation
    pub n_hill: f64,
    /// Oxidized cofactor index (ratio numerator, e.g. NAD)
    pub oxidized: usize,
    /// Reduced cofactor index (ratio denominator, e.g. NADH)
    pub reduced: usize,
    /// Ratio at half saturation
    pub km_ratio: f64,
    /// Weight of the cofactor term in [0, 1]
    pub weight: f64,
}

/// Flux-law family of one metabolite
#[derive(Debug, Clone, PartialEq)]
pub enum FluxLaw {
    /// Pure kinetic net flux
    Kinetic,
    /// (1 - β) kinetic + β fitted-curve derivative
    CurveFitBlend,
    /// Fitted-curve derivative regardless of β
    DirectFit,
    /// Value = pool total - sum of the listed metabolites; zero derivative
    Conservation { pool: Vec<usize> },
    /// `before` until the threshold time, `after` from then on
    TimeSwitch {
        threshold_h: f64,
        before: SubFlux,
        after: SubFlux,
    },
    /// Fixed linear combination of two sub-fluxes
    WeightedHybrid {
        first: (f64, SubFlux),
        second: (f64, SubFlux),
    },
    /// Kinetic flux with extra pH modulation and a cofactor-ratio term
    EnhancedRedox(RedoxCoupling),
}

/// Family tag, used for reporting and grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FluxFamily {
    Kinetic,
    CurveFitBlend,
    DirectFit,
    Conservation,
    TimeSwitch,
    WeightedHybrid,
    EnhancedRedox,
}

impl FluxLaw {
    pub fn family(&self) -> FluxFamily {
        match self {
            FluxLaw::Kinetic => FluxFamily::Kinetic,
            FluxLaw::CurveFitBlend => FluxFamily::CurveFitBlend,
            FluxLaw::DirectFit => FluxFamily::DirectFit,
            FluxLaw::Conservation { .. } => FluxFamily::Conservation,
            FluxLaw::TimeSwitch { .. } => FluxFamily::TimeSwitch,
            FluxLaw::WeightedHybrid { .. } => FluxFamily::WeightedHybrid,
            FluxLaw::EnhancedRedox(_) => FluxFamily::EnhancedRedox,
        }
    }

    /// Families that read a fitted experimental curve
    pub fn uses_curve(&self) -> bool {
        matches!(self, FluxLaw::CurveFitBlend | FluxLaw::DirectFit)
    }

    /// Families whose kinetic term carries enzyme pH modulation
    pub fn is_ph_modulated(&self) -> bool {
        matches!(
            self,
            FluxLaw::Kinetic
                | FluxLaw::CurveFitBlend
                | FluxLaw::WeightedHybrid { .. }
                | FluxLaw::EnhancedRedox(_)
        )
    }
}

impl FluxFamily {
    pub fn label(&self) -> &'static str {
        match self {
            FluxFamily::Kinetic => "kinetic",
            FluxFamily::CurveFitBlend => "blend",
            FluxFamily::DirectFit => "direct",
            FluxFamily::Conservation => "conserve",
            FluxFamily::TimeSwitch => "switch",
            FluxFamily::WeightedHybrid => "hybrid",
            FluxFamily::EnhancedRedox => "redox",
        }
    }
}
