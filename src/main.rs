use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulser_daq::bench::Bench;
use pulser_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use pulser_daq::data::session_file_name;
use pulser_daq::discovery::{find_known, list_resources, DeviceKind};
use pulser_daq::experiment::{PowerFeedback, StepResponse};
use pulser_daq::logging;
use pulser_daq::resonance::ResonanceSweep;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pulser_daq")]
#[command(about = "Power regulation and resonance search for a driven transducer")]
#[command(long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Run against the simulated bench instead of VISA instruments
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Closed-loop power regulation
    Feedback {
        /// Target power in watts
        #[arg(long)]
        setpoint: Option<f64>,
        /// Run time in seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Open-loop amplitude step
    Step,
    /// Frequency sweep to locate resonance
    Sweep {
        /// Number of sweeps to average
        #[arg(long)]
        repetitions: Option<usize>,
    },
    /// List VISA resources and the known devices among them
    Resources,
    /// Print the identification of both instruments
    Identify,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    match &cli.command {
        Commands::Feedback { setpoint, duration } => {
            if let Some(setpoint) = setpoint {
                settings.pid.setpoint = *setpoint;
            }
            if let Some(duration) = duration {
                settings.feedback.duration_secs = *duration;
            }
        }
        Commands::Sweep {
            repetitions: Some(repetitions),
        } => settings.sweep.repetitions = *repetitions,
        _ => {}
    }
    settings.validate().context("Invalid command line override")?;

    logging::init(&settings.application.log_level)?;
    info!(
        config = %cli.config.display(),
        simulate = cli.simulate,
        "{} starting",
        settings.application.name
    );

    match cli.command {
        Commands::Feedback { .. } => cmd_feedback(&settings, cli.simulate),
        Commands::Step => cmd_step(&settings, cli.simulate),
        Commands::Sweep { .. } => cmd_sweep(&settings, cli.simulate),
        Commands::Resources => cmd_resources(&settings),
        Commands::Identify => cmd_identify(&settings, cli.simulate),
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn output_path(settings: &Settings, prefix: &str) -> PathBuf {
    settings.application.output_dir.join(session_file_name(prefix))
}

fn cmd_feedback(settings: &Settings, simulate: bool) -> Result<()> {
    let mut bench = Bench::open(settings, simulate)?;
    let mut pid = settings.pid.controller();
    let feedback = PowerFeedback::from_settings(settings);
    let outcome = feedback.run(&mut bench.scope, &mut bench.generator, &mut pid);
    bench.close()?;
    let result = outcome.context("Power feedback failed")?;

    let path = result.write_csv(output_path(settings, "feedback"))?;
    println!("Power feedback: {} cycles at {} Hz", result.records.len(), result.frequency_hz);
    if let Some(error) = result.tail_error(10) {
        println!("Mean |P - {} W| over the last 10 cycles: {:.3} W", result.setpoint, error);
    }
    println!("Results written to {}", path.display());
    Ok(())
}

fn cmd_step(settings: &Settings, simulate: bool) -> Result<()> {
    let mut bench = Bench::open(settings, simulate)?;
    let outcome = StepResponse::from_settings(settings).run(&mut bench.scope, &mut bench.generator);
    bench.close()?;
    let result = outcome.context("Step response failed")?;

    let path = result.write_csv(output_path(settings, "step"))?;
    println!(
        "Step response: {} samples, {:.1} samples/s, mean measurement time {:.1} ms",
        result.samples.len(),
        result.samples_per_second(),
        result.mean_measure_secs() * 1e3
    );
    println!("Results written to {}", path.display());
    Ok(())
}

fn cmd_sweep(settings: &Settings, simulate: bool) -> Result<()> {
    let mut bench = Bench::open(settings, simulate)?;
    let sweep = ResonanceSweep::from_settings(settings);
    let repetitions = settings.sweep.repetitions;

    if repetitions > 1 {
        let outcome = sweep.run_repeated(&mut bench.scope, &mut bench.generator, repetitions);
        bench.close()?;
        let stats = outcome.context("Resonance sweep failed")?;
        let path = stats.write_csv(output_path(settings, "resonance"))?;
        println!(
            "Resonance (max power): {:.1} ± {:.1} Hz",
            stats.max_power.mean, stats.max_power.std_error
        );
        println!(
            "Resonance (zero phase): {:.1} ± {:.1} Hz",
            stats.zero_phase.mean, stats.zero_phase.std_error
        );
        println!("Results written to {}", path.display());
    } else {
        let outcome = sweep.run(&mut bench.scope, &mut bench.generator);
        bench.close()?;
        let result = outcome.context("Resonance sweep failed")?;
        let path = result.write_csv(output_path(settings, "sweep"))?;
        println!(
            "Resonance (max power): {:.1} Hz at {:.3} W",
            result.max_power_hz, result.max_power
        );
        println!(
            "Resonance (zero phase): {:.1} Hz at {:.2} deg",
            result.zero_phase_hz, result.zero_phase_deg
        );
        println!("Results written to {}", path.display());
    }
    Ok(())
}

fn cmd_resources(settings: &Settings) -> Result<()> {
    let resources = list_resources().context("Failed to enumerate VISA resources")?;
    if resources.is_empty() {
        println!("No resources found.");
        return Ok(());
    }
    println!("Connected resources:");
    for resource in &resources {
        let known = settings
            .known_devices
            .iter()
            .find(|device| device.matches(resource))
            .map(|device| format!("  ({} {})", device.kind, device.name))
            .unwrap_or_default();
        println!("  {}{}", resource, known);
    }
    for kind in [DeviceKind::Oscilloscope, DeviceKind::Generator] {
        if find_known(&resources, &settings.known_devices, kind).is_none() {
            println!("No known {} connected", kind);
        }
    }
    Ok(())
}

fn cmd_identify(settings: &Settings, simulate: bool) -> Result<()> {
    let mut bench = Bench::open(settings, simulate)?;
    let scope_idn = bench.scope.identify()?;
    let generator_idn = bench.generator.identify()?;
    println!("Oscilloscope {}: {}", bench.scope.resource(), scope_idn);
    println!("  dialect: {}", bench.scope.dialect());
    println!("Generator {}: {}", bench.generator.resource(), generator_idn);
    bench.close()?;
    Ok(())
}
