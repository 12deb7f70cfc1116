//! Per-metabolite flux evaluation.
//!
//! [`FluxEvaluator`] turns a time and a state vector into `dx/dt`. One
//! evaluation runs in six passes:
//! 1. resolve conservation-law metabolites into a working copy of the state
//! 2. evaluate every reaction's raw rate
//! 3. scale pH-sensitive rates by their enzyme activity at the current pHi
//! 4. combine rates into each metabolite's derivative according to its family
//! 5. compute dpHi/dt from proton-producing reactions and membrane transport
//! 6. sanitize (NaN to zero, clip to ±1e3 mM/h)
//!
//! Families that carry pH modulation (kinetic, blend, hybrid, redox) read the
//! modulated rates; conservation, switch and direct-fit fallbacks read the raw
//! rates.
//!
//! References:
//! - Mulquiney PJ, Kuchel PW. Biochem J. 1999;342:581-596 (RBC flux balance)
//! - Rapoport TA, Heinrich R, Rapoport SM. Biochem J. 1976;154:449-469

use crate::biochemistry::curve_fit::CurveSet;
use crate::biochemistry::enzyme::{ph_hill_response, ratio_saturation};
use crate::biochemistry::ph_sensitivity::{PhSensitivity, PhSensitivityTable, REFERENCE_PH};
use crate::biochemistry::ph_transport::{
    ph_i_derivative, relaxation_derivative, PhForcing, ProtonSources, TransportConstants,
};
use crate::network::{FluxLaw, Network, SubFlux};

/// Magnitude bound on any derivative component (mM/h)
pub const MAX_DERIVATIVE: f64 = 1e3;

/// Settings the evaluator needs beyond the network itself
#[derive(Debug, Clone, PartialEq)]
pub struct KineticsSettings {
    /// β in [0, 1]: weight of the fitted-curve derivative in blend laws
    pub curve_fit_strength: f64,
    /// Enzyme pH modulation and membrane proton transport
    pub ph_modulation: bool,
    pub forcing: PhForcing,
    pub transport: TransportConstants,
}

impl Default for KineticsSettings {
    fn default() -> Self {
        Self {
            curve_fit_strength: 1.0,
            ph_modulation: true,
            forcing: PhForcing::default(),
            transport: TransportConstants::default(),
        }
    }
}

/// A metabolite resolved algebraically from its pool
#[derive(Debug, Clone, PartialEq)]
pub struct ConservedPool {
    pub metabolite: usize,
    pub members: Vec<usize>,
    /// Pool total fixed by the initial state (mM)
    pub total_mM: f64,
}

impl ConservedPool {
    /// Value of the algebraic metabolite for state `x`
    #[inline]
    pub fn resolve(&self, x: &[f64]) -> f64 {
        self.total_mM - self.members.iter().map(|&m| x[m]).sum::<f64>()
    }
}

/// Reactions whose rates feed the metabolic proton balance
#[derive(Debug, Clone, Copy, Default)]
struct ProtonReactions {
    pyruvate_kinase: Option<usize>,
    lactate_dehydrogenase: Option<usize>,
    g6pdh: Option<usize>,
    pgd6: Option<usize>,
    hexokinase: Option<usize>,
    phosphofructokinase: Option<usize>,
}

impl ProtonReactions {
    fn bind(network: &Network) -> Self {
        Self {
            pyruvate_kinase: network.reaction_index("VPK"),
            lactate_dehydrogenase: network.reaction_index("VLDH"),
            g6pdh: network.reaction_index("VG6PDH"),
            pgd6: network.reaction_index("V6PGD"),
            hexokinase: network.reaction_index("VHK"),
            phosphofructokinase: network.reaction_index("VPFK"),
        }
    }

    fn sources(&self, rates: &[f64]) -> ProtonSources {
        let rate = |r: Option<usize>| r.map_or(0.0, |i| rates[i]);
        ProtonSources {
            pyruvate_kinase: rate(self.pyruvate_kinase),
            lactate_dehydrogenase: rate(self.lactate_dehydrogenase),
            g6pdh: rate(self.g6pdh),
            pgd6: rate(self.pgd6),
            hexokinase: rate(self.hexokinase),
            phosphofructokinase: rate(self.phosphofructokinase),
        }
    }
}

/// Kinetic (stoichiometric) part of each metabolite's derivative
#[derive(Debug, Clone, PartialEq)]
pub struct KineticTerms {
    /// From raw reaction rates
    pub raw: Vec<f64>,
    /// From pH-modulated reaction rates
    pub modulated: Vec<f64>,
}

/// Right-hand side of the RBC kinetic model
///
/// Borrows the network and the fitted curves read-only; scratch buffers are
/// owned so one evaluator serves a whole integration without allocating.
#[derive(Debug, Clone)]
pub struct FluxEvaluator<'a> {
    network: &'a Network,
    curves: &'a CurveSet,
    sensitivity: Vec<Option<PhSensitivity>>,
    activity_clip: f64,
    settings: KineticsSettings,
    pools: Vec<ConservedPool>,
    proton_reactions: ProtonReactions,
    working: Vec<f64>,
    raw_rates: Vec<f64>,
    rates: Vec<f64>,
}

impl<'a> FluxEvaluator<'a> {
    /// Build an evaluator; conservation totals are taken from `x0`
    pub fn new(
        network: &'a Network,
        curves: &'a CurveSet,
        ph_table: &PhSensitivityTable,
        settings: KineticsSettings,
        x0: &[f64],
    ) -> Self {
        let pools = network
            .conservation_laws()
            .map(|(metabolite, members)| ConservedPool {
                metabolite,
                members: members.to_vec(),
                total_mM: x0[metabolite] + members.iter().map(|&m| x0[m]).sum::<f64>(),
            })
            .collect();
        let n_reactions = network.reactions().len();

        Self {
            network,
            curves,
            sensitivity: ph_table.bind(network),
            activity_clip: ph_table.activity_clip,
            settings,
            pools,
            proton_reactions: ProtonReactions::bind(network),
            working: vec![0.0; network.n_state()],
            raw_rates: vec![0.0; n_reactions],
            rates: vec![0.0; n_reactions],
        }
    }

    pub fn network(&self) -> &'a Network {
        self.network
    }

    pub fn settings(&self) -> &KineticsSettings {
        &self.settings
    }

    pub fn pools(&self) -> &[ConservedPool] {
        &self.pools
    }

    pub fn ph_e(&self, t_h: f64) -> f64 {
        self.settings.forcing.ph_e(t_h)
    }

    /// Write algebraic metabolites into `x`
    pub fn resolve_conservation(&self, x: &mut [f64]) {
        for pool in &self.pools {
            x[pool.metabolite] = pool.resolve(x);
        }
    }

    /// pH activity factor of every reaction at `ph_i` (1.0 when unmodulated)
    pub fn activity_factors(&self, ph_i: f64) -> Vec<f64> {
        self.sensitivity
            .iter()
            .map(|s| match s {
                Some(s) if self.settings.ph_modulation => s.activity(ph_i, self.activity_clip),
                _ => 1.0,
            })
            .collect()
    }

    fn evaluate_rates(&mut self, x: &[f64]) {
        self.working.copy_from_slice(x);
        for pool in &self.pools {
            self.working[pool.metabolite] = pool.resolve(&self.working);
        }

        let ph_i = self.working[self.network.ph_index()];
        for (r, reaction) in self.network.reactions().iter().enumerate() {
            let v = reaction.rate_law.rate(&self.working);
            self.raw_rates[r] = v;
            self.rates[r] = match &self.sensitivity[r] {
                Some(s) if self.settings.ph_modulation => v * s.activity(ph_i, self.activity_clip),
                _ => v,
            };
        }
    }

    /// Net stoichiometric flux into metabolite `i`
    #[inline]
    fn net_flux(&self, i: usize, rates: &[f64]) -> f64 {
        self.network
            .incidence(i)
            .iter()
            .map(|&(r, coeff)| coeff * rates[r])
            .sum()
    }

    #[inline]
    fn sub_flux(&self, sub: &SubFlux, kinetic: f64, x_i: f64) -> f64 {
        match sub {
            SubFlux::Kinetic => kinetic,
            SubFlux::Scaled { factor } => factor * kinetic,
            SubFlux::Relaxation { target_mM, rate_per_h } => rate_per_h * (target_mM - x_i),
        }
    }

    /// Derivative of the whole state (metabolites then pHi)
    pub fn derivatives(&mut self, t_h: f64, x: &[f64], dxdt: &mut [f64]) {
        self.evaluate_rates(x);
        let beta = self.settings.curve_fit_strength;

        for (i, metabolite) in self.network.metabolites().iter().enumerate() {
            let x_i = self.working[i];
            dxdt[i] = match &metabolite.flux_law {
                FluxLaw::Kinetic => self.net_flux(i, &self.rates),
                FluxLaw::CurveFitBlend => {
                    let kinetic = self.net_flux(i, &self.rates);
                    match self.curves.get(i).and_then(|c| c.derivative_in_domain(t_h)) {
                        Some(fitted) => (1.0 - beta) * kinetic + beta * fitted,
                        None => kinetic,
                    }
                }
                FluxLaw::DirectFit => match self.curves.get(i).and_then(|c| c.derivative_in_domain(t_h)) {
                    Some(fitted) => fitted,
                    None => self.net_flux(i, &self.raw_rates),
                },
                FluxLaw::Conservation { .. } => 0.0,
                FluxLaw::TimeSwitch { threshold_h, before, after } => {
                    let kinetic = self.net_flux(i, &self.raw_rates);
                    let active = if t_h < *threshold_h { before } else { after };
                    self.sub_flux(active, kinetic, x_i)
                }
                FluxLaw::WeightedHybrid { first, second } => {
                    let kinetic = self.net_flux(i, &self.rates);
                    first.0 * self.sub_flux(&first.1, kinetic, x_i)
                        + second.0 * self.sub_flux(&second.1, kinetic, x_i)
                }
                FluxLaw::EnhancedRedox(coupling) => {
                    let kinetic = self.net_flux(i, &self.rates);
                    let ph_factor = if self.settings.ph_modulation {
                        let ph_i = self.working[self.network.ph_index()];
                        let h = ph_hill_response(ph_i, coupling.ph_opt, coupling.n_hill);
                        let h_ref = ph_hill_response(REFERENCE_PH, coupling.ph_opt, coupling.n_hill);
                        (h / h_ref).clamp(0.0, self.activity_clip)
                    } else {
                        1.0
                    };
                    let ratio = ratio_saturation(
                        self.working[coupling.oxidized],
                        self.working[coupling.reduced],
                        coupling.km_ratio,
                    );
                    // A half-saturated ratio leaves the kinetic term unchanged
                    let cofactor = (1.0 - coupling.weight) + coupling.weight * 2.0 * ratio;
                    kinetic * ph_factor * cofactor
                }
            };
        }

        let ph_index = self.network.ph_index();
        let ph_i = self.working[ph_index];
        let sources = self.proton_reactions.sources(&self.rates);
        dxdt[ph_index] = if self.settings.ph_modulation {
            ph_i_derivative(ph_i, self.settings.forcing.ph_e(t_h), &sources, &self.settings.transport)
        } else {
            relaxation_derivative(ph_i, &sources)
        };

        for d in dxdt.iter_mut() {
            *d = if d.is_nan() { 0.0 } else { d.clamp(-MAX_DERIVATIVE, MAX_DERIVATIVE) };
        }
    }

    /// Kinetic part of every metabolite's derivative, raw and pH-modulated
    pub fn kinetic_terms(&mut self, x: &[f64]) -> KineticTerms {
        self.evaluate_rates(x);
        let n = self.network.n_metabolites();
        KineticTerms {
            raw: (0..n).map(|i| self.net_flux(i, &self.raw_rates)).collect(),
            modulated: (0..n).map(|i| self.net_flux(i, &self.rates)).collect(),
        }
    }

    /// Rate of every reaction (mM/h) after pH modulation, in network order
    pub fn reaction_rates(&mut self, x: &[f64]) -> Vec<f64> {
        self.evaluate_rates(x);
        self.rates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experimental::ExperimentalData;

    fn setup() -> (Network, ExperimentalData) {
        (Network::default_rbc().unwrap(), ExperimentalData::demo().unwrap())
    }

    #[test]
    fn test_conservation_metabolite_has_zero_derivative() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let x0 = network.initial_state();
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x0);
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(0.0, &x0, &mut dxdt);
        let amp = network.metabolite_index("AMP").unwrap();
        assert_eq!(dxdt[amp], 0.0);
        assert!(dxdt.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn test_pool_total_from_initial_state() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let x0 = network.initial_state();
        let eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x0);
        let pool = &eval.pools()[0];
        assert_eq!(network.state_name(pool.metabolite), "AMP");
        assert!((pool.resolve(&x0) - x0[pool.metabolite]).abs() < 1e-12);
    }

    #[test]
    fn test_blend_boundaries() {
        let (network, data) = setup();
        let curves = CurveSet::fit(&network, &data);
        let x0 = network.initial_state();
        let glc = network.metabolite_index("GLC").unwrap();
        let curve = curves.get(glc).expect("glucose has a fitted curve");
        let t = 10.0;

        let at = |beta: f64| {
            let settings = KineticsSettings { curve_fit_strength: beta, ..Default::default() };
            let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), settings, &x0);
            let mut dxdt = vec![0.0; network.n_state()];
            eval.derivatives(t, &x0, &mut dxdt);
            (dxdt[glc], eval.kinetic_terms(&x0).modulated[glc])
        };

        let (d0, kinetic) = at(0.0);
        assert_eq!(d0, kinetic);
        let (d1, _) = at(1.0);
        assert_eq!(d1, curve.derivative(t));
    }

    #[test]
    fn test_blend_falls_back_outside_domain() {
        let (network, data) = setup();
        let curves = CurveSet::fit(&network, &data);
        let x0 = network.initial_state();
        let glc = network.metabolite_index("GLC").unwrap();
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x0);
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(60.0, &x0, &mut dxdt);
        let kinetic = eval.kinetic_terms(&x0).modulated[glc];
        assert_eq!(dxdt[glc], kinetic);
    }

    #[test]
    fn test_direct_fit_follows_curve_then_raw_kinetics() {
        let (network, data) = setup();
        let curves = CurveSet::fit(&network, &data);
        let mut x = network.initial_state();
        x[network.ph_index()] = 6.9;
        let ado = network.metabolite_index("ADO").unwrap();
        let curve = curves.get(ado).expect("adenosine has a fitted curve");
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let mut dxdt = vec![0.0; network.n_state()];

        eval.derivatives(10.0, &x, &mut dxdt);
        assert_eq!(dxdt[ado], curve.derivative(10.0));

        // Past the last measurement the curve no longer drives the metabolite
        eval.derivatives(60.0, &x, &mut dxdt);
        let terms = eval.kinetic_terms(&x);
        assert_eq!(dxdt[ado], terms.raw[ado]);
    }

    #[test]
    fn test_time_switch_changes_law_at_threshold() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let mut x = network.initial_state();
        x[network.ph_index()] = 6.9;
        let b23pg = network.metabolite_index("B23PG").unwrap();
        x[b23pg] = 4.2;
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let raw = eval.kinetic_terms(&x).raw[b23pg];
        let mut dxdt = vec![0.0; network.n_state()];

        eval.derivatives(2.0, &x, &mut dxdt);
        assert_eq!(dxdt[b23pg], raw);
        eval.derivatives(3.99, &x, &mut dxdt);
        assert_eq!(dxdt[b23pg], raw);

        let relaxation = 0.1 * (5.0 - 4.2);
        for t in [4.0, 5.0, 30.0] {
            eval.derivatives(t, &x, &mut dxdt);
            assert!(
                (dxdt[b23pg] - relaxation).abs() < 1e-12,
                "2,3-BPG after switch at t={}: {:.6} vs {:.6}",
                t,
                dxdt[b23pg],
                relaxation
            );
        }
    }

    #[test]
    fn test_weighted_hybrid_mixes_kinetics_and_relaxation() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let mut x = network.initial_state();
        let pyr = network.metabolite_index("PYR").unwrap();
        x[pyr] = 0.12;
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let kinetic = eval.kinetic_terms(&x).modulated[pyr];
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(10.0, &x, &mut dxdt);

        let expected = 0.6 * kinetic + 0.4 * 0.5 * (0.08 - 0.12);
        assert!(
            (dxdt[pyr] - expected).abs() < 1e-12,
            "pyruvate hybrid: {:.6} vs {:.6}",
            dxdt[pyr],
            expected
        );
    }

    #[test]
    fn test_redox_coupling_neutral_at_reference() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let nad = network.metabolite_index("NAD").unwrap();
        let nadh = network.metabolite_index("NADH").unwrap();
        let mut x = network.initial_state();
        x[network.ph_index()] = REFERENCE_PH;
        // NAD/NADH at the coupling's km ratio of 1.0
        x[nad] = 0.05;
        x[nadh] = 0.05;
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let kinetic = eval.kinetic_terms(&x).modulated[nadh];
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(10.0, &x, &mut dxdt);

        assert!(kinetic.abs() > 1e-9, "NADH kinetic term vanished: {}", kinetic);
        assert!(
            (dxdt[nadh] - kinetic).abs() <= 1e-4 * kinetic.abs(),
            "NADH at reference: {:.6e} vs kinetic {:.6e}",
            dxdt[nadh],
            kinetic
        );
    }

    #[test]
    fn test_redox_coupling_scales_with_hill_factor() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let nad = network.metabolite_index("NAD").unwrap();
        let nadh = network.metabolite_index("NADH").unwrap();
        let mut x = network.initial_state();
        x[network.ph_index()] = 7.0;
        x[nad] = 0.05;
        x[nadh] = 0.05;
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let kinetic = eval.kinetic_terms(&x).modulated[nadh];
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(10.0, &x, &mut dxdt);

        let hill = ph_hill_response(7.0, 7.2, 2.0) / ph_hill_response(REFERENCE_PH, 7.2, 2.0);
        let cofactor = 0.7 + 0.3 * 2.0 * ratio_saturation(0.05, 0.05, 1.0);
        let expected = kinetic * hill * cofactor;
        assert!(hill < 0.6, "acidosis should lower the Hill factor: {:.3}", hill);
        assert!(
            (dxdt[nadh] - expected).abs() <= 1e-10 * expected.abs().max(1e-12),
            "NADH at pHi 7.0: {:.6e} vs {:.6e}",
            dxdt[nadh],
            expected
        );

        // Without pH modulation only the cofactor term remains
        let settings = KineticsSettings { ph_modulation: false, ..Default::default() };
        let mut off = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), settings, &x);
        let kinetic_off = off.kinetic_terms(&x).modulated[nadh];
        off.derivatives(10.0, &x, &mut dxdt);
        assert!((dxdt[nadh] - kinetic_off * cofactor).abs() <= 1e-10 * kinetic_off.abs().max(1e-12));
    }

    #[test]
    fn test_ph_modulation_toggle() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let mut x = network.initial_state();
        x[network.ph_index()] = 6.9;
        let pfk = network.reaction_index("VPFK").unwrap();

        let mut on = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x);
        let settings = KineticsSettings { ph_modulation: false, ..Default::default() };
        let mut off = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), settings, &x);
        let v_on = on.reaction_rates(&x)[pfk];
        let v_off = off.reaction_rates(&x)[pfk];
        assert!(v_on < 0.5 * v_off, "acidosis should inhibit PFK: {:.4} vs {:.4}", v_on, v_off);
        assert!(off.activity_factors(6.9).iter().all(|&f| f == 1.0));
    }

    #[test]
    fn test_resting_ph_derivative_small() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let x0 = network.initial_state();
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &x0);
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(0.0, &x0, &mut dxdt);
        assert!(dxdt[network.ph_index()].abs() < 0.05, "dpHi/dt at rest: {}", dxdt[network.ph_index()]);
    }

    #[test]
    fn test_sanitized_output() {
        let (network, _) = setup();
        let curves = CurveSet::empty(network.n_metabolites());
        let mut x = network.initial_state();
        x[0] = f64::NAN;
        let mut eval = FluxEvaluator::new(&network, &curves, &PhSensitivityTable::default(), KineticsSettings::default(), &network.initial_state());
        let mut dxdt = vec![0.0; network.n_state()];
        eval.derivatives(0.0, &x, &mut dxdt);
        assert!(dxdt.iter().all(|d| d.is_finite() && d.abs() <= MAX_DERIVATIVE));
    }
}
