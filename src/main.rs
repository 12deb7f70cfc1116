//! RBC Kinetics - Entry point
//!
//! Red blood cell metabolic kinetics: simulation, pH perturbations and
//! parameter calibration.
//!
//! CLI Usage:
//!   cargo run -- --simulate                          # Default 42 h run
//!   cargo run -- --simulate --ph acidosis            # pH preset
//!   cargo run -- --simulate -o beta=0.5 -o t_max_h=24
//!   cargo run -- --calibrate -p vmax_VHK=1.0:0.1:10 -t GLC -t LAC
//!   cargo run -- --simulate --export exports         # Write the trajectory CSV

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use rbc_kinetics::{
    calibration::{calibrate, ParameterSet},
    config::{Parameters, RunConfig},
    error::SimulationError,
    experimental::ExperimentalData,
    export::{export_calibration_json, export_trajectory_csv},
    network::Network,
    Simulator, Trajectory,
};

/// Metabolites reported in the run summary
const SUMMARY_METABOLITES: [&str; 8] = ["GLC", "LAC", "ATP", "ADP", "B23PG", "GSH", "NADPH", "pHi"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Simulate,
    Calibrate,
    Help,
}

#[derive(Debug)]
struct CliArgs {
    mode: Mode,
    network: Option<PathBuf>,
    data: Option<PathBuf>,
    no_data: bool,
    config_dir: Option<PathBuf>,
    options: Vec<(String, String)>,
    params: Vec<String>,
    targets: Vec<String>,
    export: Option<PathBuf>,
    top_fluxes: usize,
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        mode: Mode::Simulate,
        network: None,
        data: None,
        no_data: false,
        config_dir: None,
        options: Vec::new(),
        params: Vec::new(),
        targets: Vec::new(),
        export: None,
        top_fluxes: 10,
    };

    let mut i = 1;
    let value = |i: &mut usize, flag: &str| -> Result<String> {
        *i += 1;
        args.get(*i).cloned().ok_or_else(|| anyhow!("{} needs a value", flag))
    };
    while i < args.len() {
        let flag = args[i].clone();
        match flag.as_str() {
            "--simulate" | "-s" => cli.mode = Mode::Simulate,
            "--calibrate" | "-c" => cli.mode = Mode::Calibrate,
            "--help" | "-h" => cli.mode = Mode::Help,
            "--network" | "-n" => cli.network = Some(value(&mut i, &flag)?.into()),
            "--data" | "-d" => cli.data = Some(value(&mut i, &flag)?.into()),
            "--no-data" => cli.no_data = true,
            "--config" => cli.config_dir = Some(value(&mut i, &flag)?.into()),
            "--ph" => cli.options.push(("ph_perturbation".into(), value(&mut i, &flag)?)),
            "--option" | "-o" => {
                let option = value(&mut i, &flag)?;
                let (key, v) = option
                    .split_once('=')
                    .ok_or_else(|| anyhow!("option '{}' must be key=value", option))?;
                cli.options.push((key.trim().to_string(), v.trim().to_string()));
            }
            "--param" | "-p" => cli.params.push(value(&mut i, &flag)?),
            "--target" | "-t" => cli.targets.push(value(&mut i, &flag)?),
            "--export" | "-e" => cli.export = Some(value(&mut i, &flag)?.into()),
            "--fluxes" => {
                let n = value(&mut i, &flag)?;
                cli.top_fluxes = n.parse().with_context(|| format!("--fluxes expects a count, got '{}'", n))?;
            }
            other => bail!("unknown argument '{}' (try --help)", other),
        }
        i += 1;
    }
    Ok(cli)
}

fn print_help() {
    println!("RBC Kinetics - red blood cell metabolic kinetics");
    println!();
    println!("Usage: rbc-kinetics [MODE] [OPTIONS]");
    println!();
    println!("Modes:");
    println!("  --simulate, -s          Run the network and print a summary (default)");
    println!("  --calibrate, -c         Fit parameters to the experimental data");
    println!();
    println!("Options:");
    println!("  --network, -n FILE      Network description (default: bundled RBC network)");
    println!("  --data, -d FILE         Experimental CSV time_h,metabolite,concentration_mM");
    println!("                          (default: bundled demonstration time course)");
    println!("  --no-data               Run on kinetics alone, without curves");
    println!("  --config DIR            Directory holding run.json and calibration.json");
    println!("  --ph PRESET             none, constant, step, ramp, sinusoidal, pulse,");
    println!("                          acidosis, alkalosis, circadian");
    println!("  --option, -o KEY=VALUE  Run option, e.g. beta=0.5, t_max_h=24, method=stiff");
    println!("  --param, -p NAME=I:L:U  Calibrated parameter with initial, lower, upper");
    println!("                          (NAME=L:U takes the network value as initial)");
    println!("  --target, -t NAME       Calibration target metabolite (repeatable)");
    println!("  --export, -e DIR        Write trajectory CSV / calibration JSON into DIR");
    println!("  --fluxes N              Reactions listed in the flux summary (default: 10)");
    println!("  --help, -h              Show this help");
}

fn load_network(cli: &CliArgs) -> Result<Network> {
    let network = match &cli.network {
        Some(path) => Network::from_path(path).with_context(|| format!("loading network {}", path.display()))?,
        None => Network::default_rbc().context("loading the bundled network")?,
    };
    Ok(network)
}

fn load_data(cli: &CliArgs) -> Result<Option<ExperimentalData>> {
    if cli.no_data {
        return Ok(None);
    }
    let data = match &cli.data {
        Some(path) => ExperimentalData::from_path(path)?,
        None => ExperimentalData::demo().context("reading the bundled time course")?,
    };
    Ok(Some(data))
}

fn load_parameters(cli: &CliArgs) -> Result<Parameters> {
    let mut params = match &cli.config_dir {
        Some(dir) => Parameters::load_from_dir(dir),
        None => Parameters::load_or_default(),
    };
    apply_options(&mut params.run, &cli.options)?;
    Ok(params)
}

fn apply_options(config: &mut RunConfig, options: &[(String, String)]) -> Result<()> {
    for (key, value) in options {
        config.set_option(key, value)?;
    }
    config.validate()?;
    Ok(())
}

fn print_trajectory_summary(trajectory: &Trajectory) {
    println!("\n=== Trajectory ({} points, 0 - {:.1} h) ===", trajectory.len(), trajectory.times_h.last().copied().unwrap_or(0.0));
    println!("\nMetabolites (initial -> final, mM):");
    for name in SUMMARY_METABOLITES {
        if let Some(series) = trajectory.series(name) {
            if let (Some(first), Some(last)) = (series.first(), series.last()) {
                println!("  {:<8} {:>10.4} -> {:>10.4}", name, first, last);
            }
        }
    }

    if let Some(o2) = trajectory.derived.last() {
        println!("\nOxygen transport (final):");
        println!("  pHi / pHe:          {:.3} / {:.3}", o2.ph_i, o2.ph_e);
        println!("  P50:                {:.1} mmHg", o2.p50_mmHg);
        println!("  SaO2 / SvO2:        {:.1}% / {:.1}%", o2.sat_arterial * 100.0, o2.sat_venous * 100.0);
        println!("  O2 delivered:       {:.2} mL/dL", o2.o2_delivered);
        println!("  Extraction:         {:.1}%", o2.extraction_fraction * 100.0);
    }

    let stats = &trajectory.stats;
    println!("\nSolver ({}):", stats.final_method);
    println!("  accepted/rejected:  {} / {}", stats.accepted_steps, stats.rejected_steps);
    println!("  RHS evaluations:    {}", stats.rhs_evaluations);
    println!("  Jacobians / LU:     {} / {}", stats.jacobian_evaluations, stats.lu_decompositions);
    if let Some(t) = stats.stiff_switch_h {
        println!("  switched to BDF at: {:.3} h", t);
    }
    if stats.retried_stiff {
        println!("  retried with the stiff method after a failure");
    }

    if !trajectory.warnings.is_empty() {
        println!("\nNegative concentrations ({}):", trajectory.warnings.len());
        for w in trajectory.warnings.iter().take(10) {
            println!("  {}", w);
        }
    }
}

fn run_simulation(cli: &CliArgs) -> Result<()> {
    let network = load_network(cli)?;
    let data = load_data(cli)?;
    let params = load_parameters(cli)?;
    let config = params.run;

    let simulator = Simulator::new(network, config.clone(), data.as_ref())?;
    let start = Instant::now();
    let trajectory = match simulator.run() {
        Ok(trajectory) => trajectory,
        Err(SimulationError::Integration(failure)) => {
            println!("Integration failed at t = {:.3} h ({}): {}", failure.time_h, failure.method, failure.reason);
            println!("Partial trajectory: {} points", failure.partial.len());
            print_trajectory_summary(&failure.partial);
            return Err(anyhow!("simulation stopped at {:.3} h", failure.time_h));
        }
        Err(e) => return Err(e.into()),
    };
    println!("Simulated {:.1} h in {:.2?}", config.t_max_h, start.elapsed());
    print_trajectory_summary(&trajectory);

    if config.forcing()?.is_perturbed() {
        if let Some(response) = trajectory.ph_step_response(config.ph_start_h) {
            println!("\npHi response to the pHe perturbation at {:.2} h:", config.ph_start_h);
            println!("  pHi {:.3} -> {:.3}", response.initial_ph_i, response.final_ph_i);
            if let Some(t50) = response.t50_h {
                println!("  t50: {:.3} h", t50);
            }
            if let Some(t90) = response.t90_h {
                println!("  t90: {:.3} h", t90);
            }
            println!("  pHi/pHe at end: {:.4}", response.equilibrium_ratio);
        }
    }

    if cli.top_fluxes > 0 {
        let mut fluxes = simulator.flux_summary(&trajectory)?;
        fluxes.sort_by(|a, b| b.mean_mM_per_h.abs().total_cmp(&a.mean_mM_per_h.abs()));
        println!("\nLargest mean fluxes (mM/h):");
        for f in fluxes.iter().take(cli.top_fluxes) {
            println!(
                "  {:<10} mean {:>10.4}  [{:>10.4}, {:>10.4}]",
                f.reaction, f.mean_mM_per_h, f.min_mM_per_h, f.max_mM_per_h
            );
        }
    }

    if let Some(dir) = &cli.export {
        let path = export_trajectory_csv(&trajectory, dir)?;
        println!("\nTrajectory written to {}", path.display());
    }
    Ok(())
}

/// `NAME=I:L:U`, or `NAME=L:U` with the network value as initial
fn parse_parameter(spec: &str, network: &Network, set: &mut ParameterSet) -> Result<()> {
    let (name, values) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("parameter '{}' must be NAME=initial:lower:upper", spec))?;
    let numbers: Vec<f64> = values
        .split(':')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("parameter '{}' has a non-numeric value", spec))?;
    match numbers.as_slice() {
        [initial, lower, upper] => set.push(name, *initial, *lower, *upper),
        [lower, upper] => {
            let initial = network
                .parameter(name)
                .ok_or_else(|| anyhow!("network has no parameter '{}'", name))?;
            set.push(name, initial.clamp(*lower, *upper), *lower, *upper);
        }
        _ => bail!("parameter '{}' must be NAME=initial:lower:upper or NAME=lower:upper", spec),
    }
    Ok(())
}

fn run_calibration(cli: &CliArgs) -> Result<()> {
    let network = load_network(cli)?;
    let data = load_data(cli)?.ok_or_else(|| anyhow!("calibration needs experimental data"))?;
    let params = load_parameters(cli)?;

    let mut set = ParameterSet::new();
    if cli.params.is_empty() {
        for name in ["vmax_VHK", "vmax_VPFK"] {
            let value = network
                .parameter(name)
                .ok_or_else(|| anyhow!("network has no parameter '{}'", name))?;
            set.push(name, value, 0.5 * value, 2.0 * value);
        }
    } else {
        for spec in &cli.params {
            parse_parameter(spec, &network, &mut set)?;
        }
    }
    let targets: Vec<&str> = if cli.targets.is_empty() {
        vec!["GLC", "LAC"]
    } else {
        cli.targets.iter().map(String::as_str).collect()
    };

    let simulator = Simulator::new(network, params.run.clone(), Some(&data))?;
    let start = Instant::now();
    let result = calibrate(&set, &simulator, &data, &targets, &params.calibration)?;

    println!("\n=== Calibration ({}) in {:.2?} ===", result.method, start.elapsed());
    println!("Objective:   {:.4e} -> {:.4e}", result.initial_objective, result.objective);
    println!("R²:          {:.4}", result.r_squared);
    println!("Iterations:  {} ({} simulations)", result.iterations, result.evaluations);
    println!("Converged:   {} ({})", result.success, result.message);
    println!(
        "\n{:<14} {:>10} {:>10} {:>24} {:>10}",
        "parameter", "initial", "value", "CI", "sensitivity"
    );
    for p in &result.parameters {
        let (lo, hi) = p.confidence_interval;
        println!(
            "{:<14} {:>10.4} {:>10.4} {:>11.4} - {:<11.4} {:>10.4}",
            p.name, p.initial, p.value, lo, hi, p.sensitivity
        );
    }
    println!("(intervals: {:?}, {:.0}%)", result.confidence_method, result.confidence_level * 100.0);
    if let Some(cv) = &result.cross_validation {
        println!(
            "\nLeave-one-timepoint-out RMSE: {:.4e} ± {:.4e} over {} folds",
            cv.mean_rmse,
            cv.std_rmse,
            cv.folds.len()
        );
    }

    if let Some(dir) = &cli.export {
        let path = export_calibration_json(&result, dir)?;
        println!("\nCalibration written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = parse_args()?;
    log::info!("RBC Kinetics starting ({:?})", cli.mode);

    match cli.mode {
        Mode::Help => {
            print_help();
            Ok(())
        }
        Mode::Simulate => run_simulation(&cli),
        Mode::Calibrate => run_calibration(&cli),
    }
}
