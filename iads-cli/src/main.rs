//! IADS operator CLI
//!
//! Drives the detection core against the built-in network simulator.
//! Real deployments replace the simulator with a probe executor wired
//! to their controller; the core is identical either way.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod settings;
mod simulator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use iads_core::{IadsController, IadsCore, ProbeExecutor};
use simulator::SimulatedNetwork;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iads", version, about = "Integrated Adaptive Detection System")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the detection loop against the built-in network simulator
    Run {
        /// TOML configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of switches in the simulated ring topology
        #[arg(long, default_value_t = 4)]
        switches: u64,

        /// How long to run before reporting, in seconds
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,

        /// Take one link down halfway through the run
        #[arg(long)]
        inject_fault: bool,

        /// Congest one link halfway through the run
        #[arg(long)]
        inject_congestion: bool,

        /// Simulator RNG seed
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Print the full report instead of the status summary
        #[arg(long)]
        report: bool,
    },

    /// Validate a configuration file and exit
    ValidateConfig {
        /// TOML configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("IADS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            config,
            switches,
            duration_secs,
            inject_fault,
            inject_congestion,
            seed,
            report,
        } => {
            run(
                config.as_deref(),
                switches,
                duration_secs,
                inject_fault,
                inject_congestion,
                seed,
                report,
            )
            .await
        }
        Command::ValidateConfig { config } => {
            settings::load_config(Some(config.as_path()))?;
            println!("{} is valid", config.display());
            Ok(())
        }
    }
}

async fn run(
    config_path: Option<&std::path::Path>,
    switches: u64,
    duration_secs: u64,
    inject_fault: bool,
    inject_congestion: bool,
    seed: u64,
    report: bool,
) -> Result<()> {
    // invalid configuration is fatal here, before anything starts
    let config = settings::load_config(config_path)?;

    let network = Arc::new(SimulatedNetwork::new(
        config.system.max_parallel_probes,
        seed,
    ));
    let topology = SimulatedNetwork::ring_topology(switches.max(2));
    network.register_topology(&topology);

    let (topology_tx, topology_rx) = mpsc::channel(256);
    for event in &topology {
        topology_tx.send(*event).await?;
    }

    let core = IadsCore::new(config);
    let executor: Arc<dyn ProbeExecutor> = network.clone();
    let mut controller = IadsController::with_core(core, executor, topology_rx);
    let shutdown = controller.shutdown_handle();

    info!(switches, duration_secs, "starting detection loop");

    if inject_fault || inject_congestion {
        let network = network.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration_secs / 2)).await;
            match network.some_link() {
                Some(link) => {
                    if inject_congestion {
                        network.inject_congestion(&link);
                    }
                    if inject_fault {
                        network.take_down(&link);
                    }
                }
                None => warn!("no link available for fault injection"),
            }
        });
    }

    let loop_task = tokio::spawn(async move {
        let result = controller.run().await;
        (controller, result)
    });

    tokio::select! {
        _ = sleep(Duration::from_secs(duration_secs)) => {
            info!("run duration elapsed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
    shutdown.stop();

    let (controller, result) = loop_task.await?;
    result?;

    let output = if report {
        serde_json::to_string_pretty(&controller.report().await)?
    } else {
        serde_json::to_string_pretty(&controller.status().await)?
    };
    println!("{output}");
    Ok(())
}
