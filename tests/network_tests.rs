//! Reaction network tests
//!
//! Loading the built-in RBC network from disk and from a string, parameter
//! access, and a complete simulation of a small hand-written network whose
//! mass balance is known exactly.

use rbc_kinetics::network::{Compartment, FluxFamily};
use rbc_kinetics::{simulate, MalformedNetworkError, Network, RunConfig};

const NETWORK_PATH: &str = "data/networks/rbc_brodbar.net";

/// X -> A -> B <-> 2 C: X + A + B + C/2 is conserved
const CHAIN: &str = "\
# uptake, conversion and a reversible split
-METINT
A B C
-METEXT
X
-ENZIRREV
VIN V1
-ENZREV
V2
-CAT
VIN : X => A .
V1 : A => B
V2 : B = 2 C .
-KIN
VIN = 1.0 * X:0.5
V1 = 2.0 * A:0.1
V2 = 0.5 * (B:0.2 - C:0.2)
-INIT
A 0.5  B 0.0  C 0.0  X 2.0
";

// ============================================================================
// Loading Tests
// ============================================================================

#[test]
fn test_load_from_path_matches_builtin() {
    let from_disk = Network::from_path(NETWORK_PATH).expect("network file parses");
    let builtin = Network::default_rbc().unwrap();
    assert_eq!(from_disk.n_metabolites(), builtin.n_metabolites());
    assert_eq!(from_disk.reactions().len(), builtin.reactions().len());
    assert_eq!(from_disk.initial_state(), builtin.initial_state());
}

#[test]
fn test_compartments() {
    let network = Network::default_rbc().unwrap();
    let external = network
        .metabolites()
        .iter()
        .filter(|m| m.compartment == Compartment::External)
        .count();
    assert_eq!(external, 22);
    assert_eq!(network.n_metabolites() - external, 85);
    assert_eq!(network.metabolite("ELAC").unwrap().compartment, Compartment::External);
    assert_eq!(network.metabolite("LAC").unwrap().compartment, Compartment::Internal);
}

#[test]
fn test_missing_file() {
    match Network::from_path("data/networks/does_not_exist.net") {
        Err(MalformedNetworkError::Io { path, .. }) => assert!(path.contains("does_not_exist")),
        other => panic!("expected an I/O error, got {:?}", other.map(|n| n.n_metabolites())),
    }
}

#[test]
fn test_malformed_description_rejected() {
    let broken = CHAIN.replace("V1 : A => B", "V1 : A => Q");
    let error = Network::load(&broken).expect_err("Q is not declared");
    assert!(error.to_string().contains('Q'), "{}", error);
}

// ============================================================================
// Structure Tests
// ============================================================================

#[test]
fn test_single_adenylate_conservation_law() {
    let network = Network::default_rbc().unwrap();
    let laws: Vec<(usize, Vec<usize>)> = network.conservation_laws().map(|(m, pool)| (m, pool.to_vec())).collect();
    assert_eq!(laws.len(), 1);
    let (amp, pool) = &laws[0];
    assert_eq!(network.state_name(*amp), "AMP");
    let names: Vec<&str> = pool.iter().map(|&i| network.state_name(i)).collect();
    assert_eq!(names, vec!["ATP", "ADP"]);
}

#[test]
fn test_family_counts_cover_every_metabolite() {
    let network = Network::default_rbc().unwrap();
    let counts = network.family_counts();
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 107);
    let conservation = counts.iter().find(|(f, _)| *f == FluxFamily::Conservation).map(|(_, n)| *n);
    assert_eq!(conservation, Some(1));
}

#[test]
fn test_every_reaction_has_a_vmax() {
    let mut network = Network::default_rbc().unwrap();
    let names: Vec<String> = network.reactions().iter().map(|r| r.name.clone()).collect();
    for name in names {
        let key = format!("vmax_{}", name);
        let vmax = network.parameter(&key).unwrap_or_else(|| panic!("{} has no Vmax", name));
        network.set_parameter(&key, 2.0 * vmax).unwrap();
        assert_eq!(network.parameter(&key), Some(2.0 * vmax));
    }
}

// ============================================================================
// Custom Network Tests
// ============================================================================

#[test]
fn test_chain_network_parses() {
    let network = Network::load(CHAIN).expect("chain parses");
    assert_eq!(network.n_metabolites(), 4);
    assert_eq!(network.n_state(), 5);
    assert_eq!(network.reactions().len(), 3);
    let x0 = network.initial_state();
    assert_eq!(x0, vec![0.5, 0.0, 0.0, 2.0, 7.2]);
}

#[test]
fn test_chain_network_conserves_mass() {
    let network = Network::load(CHAIN).unwrap();
    let config = RunConfig {
        t_max_h: 5.0,
        n_output_points: 11,
        ..RunConfig::default()
    };
    let trajectory = simulate(&network, &config, None).expect("chain simulates");
    let (a, b, c, x) = (0, 1, 2, 3);

    for (t, s) in trajectory.times_h.iter().zip(&trajectory.states) {
        let mass = s[x] + s[a] + s[b] + 0.5 * s[c];
        assert!((mass - 2.5).abs() < 1e-4, "Mass at {:.1} h: {:.6} (expected 2.5)", t, mass);
        assert!(s.iter().all(|v| *v >= -1e-6), "negative state at {:.1} h: {:?}", t, s);
    }

    let last = trajectory.final_state().unwrap();
    assert!(last[x] < 2.0, "X was not taken up: {:.3}", last[x]);
    assert!(last[c] > 0.0, "C was not produced");
    // No proton sources: pHi rests at 7.2
    assert!((last[4] - 7.2).abs() < 1e-6);
}
