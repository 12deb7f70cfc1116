//! Reaction rate laws.
//!
//! Two shapes cover the whole RBC network:
//! - `Saturating`: Vmax times a product of saturation terms
//! - `Exchange`: Vmax times the difference of inside and outside saturation
//!
//! A saturation term is either a single metabolite `S/(Km + S)` or a cofactor
//! ratio `(A/B)/(Km + A/B)`.

use crate::biochemistry::enzyme::{bidirectional_exchange, ratio_saturation, saturation};

/// One saturating factor of a rate law
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationTerm {
    /// Metabolite (or ratio numerator) index
    pub numerator: usize,
    /// Ratio denominator index, if this is a cofactor-ratio term
    pub denominator: Option<usize>,
    /// Half-saturation constant (mM, or dimensionless for ratios)
    pub km: f64,
}

impl SaturationTerm {
    pub fn metabolite(index: usize, km: f64) -> Self {
        Self { numerator: index, denominator: None, km }
    }

    pub fn ratio(numerator: usize, denominator: usize, km: f64) -> Self {
        Self { numerator, denominator: Some(denominator), km }
    }

    #[inline]
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        match self.denominator {
            None => saturation(x[self.numerator], self.km),
            Some(den) => ratio_saturation(x[self.numerator], x[den], self.km),
        }
    }
}

/// Rate law of a single reaction (mM/h)
#[derive(Debug, Clone, PartialEq)]
pub enum RateLaw {
    Saturating {
        vmax_mM_per_h: f64,
        terms: Vec<SaturationTerm>,
    },
    Exchange {
        vmax_mM_per_h: f64,
        inside: SaturationTerm,
        outside: SaturationTerm,
    },
}

impl RateLaw {
    /// Evaluate the rate for the current state
    #[inline]
    pub fn rate(&self, x: &[f64]) -> f64 {
        match self {
            RateLaw::Saturating { vmax_mM_per_h, terms } => {
                let mut v = *vmax_mM_per_h;
                for term in terms {
                    v *= term.evaluate(x);
                    if v == 0.0 {
                        break;
                    }
                }
                v
            }
            RateLaw::Exchange { vmax_mM_per_h, inside, outside } => {
                // Ratio terms are rejected at load time for exchange laws
                bidirectional_exchange(
                    *vmax_mM_per_h,
                    x[inside.numerator],
                    inside.km,
                    x[outside.numerator],
                    outside.km,
                )
            }
        }
    }

    pub fn vmax(&self) -> f64 {
        match self {
            RateLaw::Saturating { vmax_mM_per_h, .. } | RateLaw::Exchange { vmax_mM_per_h, .. } => {
                *vmax_mM_per_h
            }
        }
    }

    pub fn set_vmax(&mut self, value: f64) {
        match self {
            RateLaw::Saturating { vmax_mM_per_h, .. } | RateLaw::Exchange { vmax_mM_per_h, .. } => {
                *vmax_mM_per_h = value
            }
        }
    }

    pub fn is_exchange(&self) -> bool {
        matches!(self, RateLaw::Exchange { .. })
    }

    /// All saturation terms, in declaration order
    pub fn terms(&self) -> Vec<&SaturationTerm> {
        match self {
            RateLaw::Saturating { terms, .. } => terms.iter().collect(),
            RateLaw::Exchange { inside, outside, .. } => vec![inside, outside],
        }
    }

    pub fn terms_mut(&mut self) -> Vec<&mut SaturationTerm> {
        match self {
            RateLaw::Saturating { terms, .. } => terms.iter_mut().collect(),
            RateLaw::Exchange { inside, outside, .. } => vec![inside, outside],
        }
    }

    /// True if the rate vanishes when metabolite `index` is depleted
    ///
    /// Exchange laws gate each side on its own saturation term; for a forward
    /// flux the inside term is what matters, so both sides count as gated.
    pub fn gates(&self, index: usize) -> bool {
        self.terms().iter().any(|t| t.numerator == index)
    }
}
