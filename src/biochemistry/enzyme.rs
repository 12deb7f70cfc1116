//! Enzyme rate primitives used by the network rate laws.
//!
//! Every rate law in the RBC network is assembled from a handful of
//! saturating factors:
//! - Michaelis-Menten saturation of a substrate
//! - saturation of a cofactor ratio (NAD/NADH, ADP/ATP, NADP/NADPH)
//! - bidirectional membrane exchange (inside minus outside saturation)
//! - Hill response to pH, used for enzyme pH modulation
//!
//! Rates are expressed in mM/h throughout.
//!
//! References:
//! - Cornish-Bowden A. Fundamentals of Enzyme Kinetics. 4th ed. Wiley-Blackwell, 2012
//! - Mulquiney PJ, Kuchel PW. Biochem J. 1999;342:567-580 (RBC kinetic model)

/// Smallest Km accepted by the saturation factors (mM)
pub const MIN_KM_MM: f64 = 1e-6;

/// Offset added to ratio denominators to keep them finite (mM)
pub const RATIO_OFFSET_MM: f64 = 1e-6;

/// Stoichiometry of a single reaction
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionStoichiometry {
    /// Substrates consumed (metabolite index, stoichiometric coefficient)
    pub substrates: Vec<(usize, f64)>,
    /// Products produced (metabolite index, stoichiometric coefficient)
    pub products: Vec<(usize, f64)>,
}

impl ReactionStoichiometry {
    /// Create a new stoichiometry definition
    pub fn new(substrates: Vec<(usize, f64)>, products: Vec<(usize, f64)>) -> Self {
        Self { substrates, products }
    }

    /// Net signed coefficients, one entry per metabolite with non-zero net change
    ///
    /// A metabolite on both sides contributes the difference of its coefficients.
    pub fn net(&self) -> Vec<(usize, f64)> {
        let mut net: Vec<(usize, f64)> = Vec::new();
        let mut add = |idx: usize, coeff: f64| {
            if let Some(entry) = net.iter_mut().find(|(i, _)| *i == idx) {
                entry.1 += coeff;
            } else {
                net.push((idx, coeff));
            }
        };
        for &(idx, coeff) in &self.substrates {
            add(idx, -coeff);
        }
        for &(idx, coeff) in &self.products {
            add(idx, coeff);
        }
        net.retain(|(_, c)| c.abs() > 1e-12);
        net.sort_by_key(|(i, _)| *i);
        net
    }

    /// Apply the reaction to a derivatives vector given a reaction rate
    pub fn apply(&self, dydt: &mut [f64], rate_mM_per_h: f64) {
        for &(idx, coeff) in &self.substrates {
            if idx < dydt.len() {
                dydt[idx] -= coeff * rate_mM_per_h;
            }
        }
        for &(idx, coeff) in &self.products {
            if idx < dydt.len() {
                dydt[idx] += coeff * rate_mM_per_h;
            }
        }
    }
}

// ============================================================================
// Standard Kinetic Rate Equations
// ============================================================================

/// Simple Michaelis-Menten kinetics
///
/// v = Vmax * [S] / (Km + [S])
///
/// # Reference
/// Michaelis L, Menten ML. Biochemische Zeitschrift. 1913;49:333-369
#[inline]
pub fn michaelis_menten(vmax_mM_per_h: f64, km_mM: f64, s_mM: f64) -> f64 {
    if s_mM <= 0.0 {
        return 0.0;
    }
    vmax_mM_per_h * s_mM / (km_mM + s_mM)
}

/// Hill kinetics for cooperative binding
///
/// v = Vmax * [S]^n / (K0.5^n + [S]^n)
///
/// # Reference
/// Hill AV. Journal of Physiology. 1910;40:iv-vii
#[inline]
pub fn hill_kinetics(vmax: f64, k_half: f64, s: f64, n: f64) -> f64 {
    if s <= 0.0 {
        return 0.0;
    }
    let s_n = s.powf(n);
    let k_n = k_half.powf(n);
    vmax * s_n / (k_n + s_n)
}

/// Dimensionless saturation factor s / (Km + s)
///
/// Negative concentrations give zero so a drained substrate stops its reaction.
#[inline]
pub fn saturation(s_mM: f64, km_mM: f64) -> f64 {
    michaelis_menten(1.0, km_mM.max(MIN_KM_MM), s_mM)
}

/// Saturation of a cofactor ratio, e.g. NAD/NADH for GAPDH
#[inline]
pub fn ratio_saturation(numerator_mM: f64, denominator_mM: f64, km: f64) -> f64 {
    let ratio = numerator_mM.max(0.0) / (denominator_mM.max(0.0) + RATIO_OFFSET_MM);
    saturation(ratio, km)
}

/// Bidirectional facilitated exchange across the membrane
///
/// v = Vmax * (S_in/(Km_in + S_in) - S_out/(Km_out + S_out))
///
/// Positive values move material from inside to outside.
#[inline]
pub fn bidirectional_exchange(
    vmax_mM_per_h: f64,
    inside_mM: f64,
    km_inside_mM: f64,
    outside_mM: f64,
    km_outside_mM: f64,
) -> f64 {
    vmax_mM_per_h * (saturation(inside_mM, km_inside_mM) - saturation(outside_mM, km_outside_mM))
}

/// Hill-type titration curve for enzyme activity versus pH
///
/// h(pH) = 1 / (1 + 10^(n (pH_opt - pH)))
///
/// Rises from 0 (acid side) to 1 (alkaline side) with the midpoint at `ph_opt`.
#[inline]
pub fn ph_hill_response(ph: f64, ph_opt: f64, n_hill: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(n_hill * (ph_opt - ph)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_michaelis_menten() {
        let vmax = 1.0;
        let km = 0.1;
        let rate = michaelis_menten(vmax, km, km);
        assert!((rate - 0.5).abs() < 1e-10);

        let rate_high = michaelis_menten(vmax, km, 100.0 * km);
        assert!((rate_high - vmax).abs() < 0.01);

        assert_eq!(michaelis_menten(vmax, km, 0.0), 0.0);
        assert_eq!(michaelis_menten(vmax, km, -0.3), 0.0);
    }

    #[test]
    fn test_hill_kinetics() {
        let k_half = 0.1;
        for n in [1.0, 2.0, 4.0] {
            let rate = hill_kinetics(1.0, k_half, k_half, n);
            assert!((rate - 0.5).abs() < 1e-10, "half saturation at K0.5 for n = {}", n);
        }

        let mm_rate = michaelis_menten(1.0, k_half, 0.05);
        let hill_rate = hill_kinetics(1.0, k_half, 0.05, 1.0);
        assert!((mm_rate - hill_rate).abs() < 1e-10);
    }

    #[test]
    fn test_saturation_guards_km() {
        // Km of zero is raised to the floor instead of dividing by zero
        let s = saturation(1.0, 0.0);
        assert!(s > 0.999 && s <= 1.0);
    }

    #[test]
    fn test_ratio_saturation() {
        // NAD/NADH = 1 with Km = 1 gives half saturation
        let f = ratio_saturation(0.5, 0.5, 1.0);
        assert!((f - 0.5).abs() < 1e-5, "ratio saturation {}", f);

        // Oxidized pool drained: no flux
        assert_eq!(ratio_saturation(0.0, 0.5, 1.0), 0.0);
    }

    #[test]
    fn test_bidirectional_exchange_sign() {
        let out = bidirectional_exchange(2.0, 1.0, 0.1, 0.1, 0.1);
        assert!(out > 0.0, "efflux when inside is higher: {}", out);

        let inward = bidirectional_exchange(2.0, 0.1, 0.1, 1.0, 0.1);
        assert!(inward < 0.0, "influx when outside is higher: {}", inward);

        assert!(bidirectional_exchange(2.0, 0.4, 0.1, 0.4, 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_ph_hill_response_midpoint() {
        let h = ph_hill_response(7.4, 7.4, 3.0);
        assert!((h - 0.5).abs() < 1e-12);
        assert!(ph_hill_response(8.0, 7.4, 3.0) > 0.99);
        assert!(ph_hill_response(6.8, 7.4, 3.0) < 0.01);
    }

    #[test]
    fn test_stoichiometry_apply() {
        let stoich = ReactionStoichiometry::new(vec![(0, 1.0)], vec![(1, 1.0)]);

        let mut dydt = vec![0.0, 0.0];
        stoich.apply(&mut dydt, 0.1);

        assert!((dydt[0] - (-0.1)).abs() < 1e-10);
        assert!((dydt[1] - 0.1).abs() < 1e-10);
    }

    #[test]
    fn test_stoichiometry_net_combines_sides() {
        // 2 ADP = AMP + ATP
        let stoich = ReactionStoichiometry::new(vec![(1, 2.0)], vec![(2, 1.0), (0, 1.0)]);
        assert_eq!(stoich.net(), vec![(0, 1.0), (1, -2.0), (2, 1.0)]);

        // A + B = A + C keeps only B and C
        let catalytic = ReactionStoichiometry::new(vec![(0, 1.0), (1, 1.0)], vec![(0, 1.0), (2, 1.0)]);
        assert_eq!(catalytic.net(), vec![(1, -1.0), (2, 1.0)]);
    }
}
