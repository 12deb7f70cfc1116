//! Simulation benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rbc_kinetics::biochemistry::{CurveSet, FluxEvaluator, KineticsSettings, PhSensitivityTable};
use rbc_kinetics::{ExperimentalData, Network, RunConfig, Simulator};

fn bench_network_parse(c: &mut Criterion) {
    c.bench_function("network_parse", |b| b.iter(|| Network::default_rbc()));
}

fn bench_derivatives(c: &mut Criterion) {
    let network = Network::default_rbc().expect("default network loads");
    let data = ExperimentalData::demo().expect("demo data loads");
    let curves = CurveSet::fit(&network, &data);
    let table = PhSensitivityTable::default();
    let x0 = network.initial_state();
    let mut evaluator = FluxEvaluator::new(&network, &curves, &table, KineticsSettings::default(), &x0);
    let mut dxdt = vec![0.0; network.n_state()];

    c.bench_function("derivatives", |b| {
        b.iter(|| evaluator.derivatives(black_box(5.0), black_box(&x0), &mut dxdt))
    });
}

fn bench_short_run(c: &mut Criterion) {
    let network = Network::default_rbc().expect("default network loads");
    let data = ExperimentalData::demo().expect("demo data loads");
    let config = RunConfig {
        t_max_h: 4.0, // Smaller for benchmarking
        n_output_points: 9,
        ..RunConfig::default()
    };
    let simulator = Simulator::new(network, config, Some(&data)).expect("valid configuration");

    let mut group = c.benchmark_group("simulation");
    group.sample_size(10);
    group.bench_function("run_4h", |b| b.iter(|| simulator.run()));
    group.finish();
}

criterion_group!(benches, bench_network_parse, bench_derivatives, bench_short_run);
criterion_main!(benches);
