//! Thermal Governor CLI
//!
//! `run` drives the real device through sysfs; `simulate` runs the same control
//! loop against a simulated plant; `policy` and `forecast` inspect the learned
//! Q-table and the forecasting model artifact.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thermal_governor::{
    simulate, ControlLoop, GovernorConfig, LinearVelocityModel, PolicyStore, SimulationOptions, StrategyKind,
    SysfsBackend,
};

#[derive(Parser)]
#[command(name = "governor")]
#[command(about = "Thermal Governor - Adaptive CPU Gear Control", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Decision strategy (learning or predictive)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Minimum seconds between non-emergency shifts
    #[arg(long)]
    cooldown: Option<f64>,

    /// Where the Q-table is persisted
    #[arg(long, value_name = "FILE")]
    policy_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Govern the real device until Ctrl-C
    Run,

    /// Run the control loop against a simulated battery
    Simulate {
        /// Number of control cycles
        #[arg(short = 'n', long, default_value = "600")]
        cycles: u64,

        /// Workload intensity (1.0 = nominal)
        #[arg(long, default_value = "1.0")]
        stress: f64,

        /// Starting temperature (°C)
        #[arg(long, default_value = "35.0")]
        start: f64,

        /// RNG seed for sensor noise
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Probability that a reading drops out as 0.0
        #[arg(long, default_value = "0.0")]
        dropout: f64,

        /// Save the policy learned in the run here (the configured policy is never written)
        #[arg(long, value_name = "FILE")]
        policy_out: Option<PathBuf>,
    },

    /// Print the persisted Q-table
    Policy {
        /// Policy file (defaults to the configured path)
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,
    },

    /// Roll the forecasting model forward under constant stress
    Forecast {
        /// Model artifact (defaults to the configured path)
        #[arg(long, value_name = "FILE")]
        model: Option<PathBuf>,

        #[arg(long, default_value = "1.0")]
        stress: f64,

        #[arg(long, default_value = "35.0")]
        start: f64,

        #[arg(long, default_value = "30")]
        steps: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // Load configuration
    let mut config: GovernorConfig = if let Some(config_path) = &cli.config {
        log::info!("Loading config from: {}", config_path.display());
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        toml::from_str(&content)?
    } else {
        GovernorConfig::default()
    };

    // Override with CLI options
    if let Some(strategy) = &cli.strategy {
        config.strategy = parse_strategy(strategy)?;
    }
    if let Some(cooldown) = cli.cooldown {
        config.arbitration.cooldown_secs = cooldown;
    }
    if let Some(path) = cli.policy_path {
        config.learning.policy_path = path;
    }

    match cli.command {
        Commands::Run => {
            let backend = SysfsBackend::new(&config.sysfs)?;
            let mut governor = ControlLoop::new(config, backend)?;

            governor
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }

        Commands::Simulate { cycles, stress, start, seed, dropout, policy_out } => {
            let options = SimulationOptions {
                cycles,
                stress,
                start,
                seed,
                dropout,
                policy_out,
            };
            let report = simulate(config, &options)?;

            println!("\n=== Simulation ===");
            println!("Cycles: {} ({} skipped)", report.stats.cycles, report.stats.skipped);
            println!("Shifts: {}", report.stats.shifts);
            println!("Learning updates: {}", report.stats.learning_updates);
            println!("Final temperature: {:.2}°C", report.final_temperature);
            println!("Peak temperature: {:.2}°C", report.peak_temperature);
            for (index, count) in report.time_in_gear.iter().enumerate() {
                let share = *count as f64 / cycles.max(1) as f64 * 100.0;
                println!("Gear {}: {:5.1}%", index + 1, share);
            }
            if let Some(path) = &options.policy_out {
                println!("Policy saved to {}", path.display());
            }
        }

        Commands::Policy { path } => {
            let path = path.unwrap_or(config.learning.policy_path);
            let store = PolicyStore::new(&path, config.sysfs.gear_ratios.len());
            let rows = store.inspect()?;

            println!("\n=== Policy: {} ===", path.display());
            println!("States: {}", rows.len());
            for row in rows {
                let values: Vec<String> = row.values.iter().map(|v| format!("{:8.2}", v)).collect();
                println!("{:>6} | {} | best: Gear {}", row.state, values.join(" "), row.best_action + 1);
            }
        }

        Commands::Forecast { model, stress, start, steps } => {
            let path = model
                .or(config.forecast.model_path)
                .context("no model artifact given and none configured")?;
            let model = LinearVelocityModel::load(&path)?;
            let trajectory = model.rollout(stress, start, steps)?;

            println!("\n=== Forecast: {} (stress {:.2}) ===", path.display(), stress);
            for (step, temp) in trajectory.iter().enumerate() {
                println!("{:>4}: {:.2}°C", step, temp);
            }
        }
    }

    Ok(())
}

fn parse_strategy(s: &str) -> Result<StrategyKind> {
    match s.to_lowercase().as_str() {
        "learning" | "rl" | "q" => Ok(StrategyKind::Learning),
        "predictive" | "forecast" => Ok(StrategyKind::Predictive),
        _ => anyhow::bail!("Invalid strategy: {} (expected learning or predictive)", s),
    }
}
