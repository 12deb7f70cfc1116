//! Flux evaluator tests on the built-in network
//!
//! The right-hand side must be finite and bounded everywhere the integrator
//! may wander, blend laws must interpolate between kinetics and the fitted
//! curves, and pH modulation must act through the sensitivity table.

use rand::prelude::*;

use rbc_kinetics::biochemistry::kinetics::MAX_DERIVATIVE;
use rbc_kinetics::biochemistry::{CurveSet, FluxEvaluator, KineticsSettings, PhSensitivityTable};
use rbc_kinetics::{ExperimentalData, Network};

fn setup() -> (Network, CurveSet) {
    let network = Network::default_rbc().expect("default network loads");
    let data = ExperimentalData::demo().expect("demo data loads");
    let curves = CurveSet::fit(&network, &data);
    (network, curves)
}

// ============================================================================
// Robustness Tests
// ============================================================================

#[test]
fn test_derivatives_finite_on_random_states() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let mut rng = StdRng::seed_from_u64(11);
    let mut dxdt = vec![0.0; network.n_state()];

    for _ in 0..200 {
        let mut x: Vec<f64> = x0.iter().map(|v| v * rng.gen_range(0.0..3.0)).collect();
        x[network.ph_index()] = rng.gen_range(6.5..8.0);
        let t = rng.gen_range(0.0..42.0);
        evaluator.derivatives(t, &x, &mut dxdt);
        for (i, d) in dxdt.iter().enumerate() {
            assert!(d.is_finite(), "{} derivative not finite at t = {:.2}", network.state_name(i), t);
            assert!(d.abs() <= MAX_DERIVATIVE, "{} derivative {:.3e}", network.state_name(i), d);
        }
    }
}

#[test]
fn test_derivatives_survive_drained_state() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let mut x = vec![0.0; network.n_state()];
    x[network.ph_index()] = 7.2;
    let mut dxdt = vec![0.0; network.n_state()];
    evaluator.derivatives(0.0, &x, &mut dxdt);
    assert!(dxdt.iter().all(|d| d.is_finite()));
}

// ============================================================================
// Flux Law Tests
// ============================================================================

#[test]
fn test_blend_follows_curve_at_full_strength() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let glc = network.metabolite_index("GLC").unwrap();
    let fitted = curves.get(glc).and_then(|c| c.derivative_in_domain(10.0)).expect("GLC curve covers 10 h");

    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let mut dxdt = vec![0.0; network.n_state()];
    evaluator.derivatives(10.0, &x0, &mut dxdt);
    assert!((dxdt[glc] - fitted).abs() < 1e-12, "GLC: {:.6} vs fitted {:.6}", dxdt[glc], fitted);
}

#[test]
fn test_blend_is_kinetic_at_zero_strength() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let glc = network.metabolite_index("GLC").unwrap();
    let settings = KineticsSettings {
        curve_fit_strength: 0.0,
        ..KineticsSettings::default()
    };

    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, settings, &x0);
    let kinetic = evaluator.kinetic_terms(&x0).modulated[glc];
    let mut dxdt = vec![0.0; network.n_state()];
    evaluator.derivatives(10.0, &x0, &mut dxdt);
    assert!((dxdt[glc] - kinetic).abs() < 1e-12, "GLC: {:.6} vs kinetic {:.6}", dxdt[glc], kinetic);
}

#[test]
fn test_conservation_resolved_from_initial_total() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let (atp, adp, amp) = (
        network.metabolite_index("ATP").unwrap(),
        network.metabolite_index("ADP").unwrap(),
        network.metabolite_index("AMP").unwrap(),
    );
    let total = x0[atp] + x0[adp] + x0[amp];

    let mut x = x0.clone();
    x[atp] = 1.0;
    x[adp] = 0.5;
    evaluator.resolve_conservation(&mut x);
    assert!((x[amp] - (total - 1.5)).abs() < 1e-12, "AMP resolved to {:.4}", x[amp]);
}

// ============================================================================
// pH Modulation Tests
// ============================================================================

#[test]
fn test_pfk_rate_scaled_by_activity() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let pfk = network.reaction_index("VPFK").unwrap();

    let rest = evaluator.reaction_rates(&x0)[pfk];
    let mut acid = x0.clone();
    acid[network.ph_index()] = 7.0;
    let acidic = evaluator.reaction_rates(&acid)[pfk];

    assert!(rest > 0.0, "PFK idle at the initial state");
    let ratio = acidic / rest;
    let expected = table.activity("VPFK", 7.0);
    assert!((ratio - expected).abs() < 1e-9, "PFK ratio {:.4} vs activity {:.4}", ratio, expected);
}

#[test]
fn test_modulation_disabled() {
    let (network, curves) = setup();
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let settings = KineticsSettings {
        ph_modulation: false,
        ..KineticsSettings::default()
    };
    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, settings, &x0);
    assert!(evaluator.activity_factors(6.8).iter().all(|f| *f == 1.0));

    let mut acid = x0.clone();
    acid[network.ph_index()] = 6.8;
    let terms = evaluator.kinetic_terms(&acid);
    assert_eq!(terms.raw, terms.modulated);
}
