//! CLI entry point for the `fe-sinus` frontend.
//!
//! Runs the synthetic digitizer under the in-process host loop, or prints the
//! effective configuration.
//!
//! # Usage
//!
//! Take one run of 10 seconds:
//! ```bash
//! fe-sinus --config config/fe-sinus.toml run --seconds 10 --run-number 42
//! ```
//!
//! Run until Ctrl+C:
//! ```bash
//! fe-sinus run
//! ```
//!
//! Show the settings and the store after key registration:
//! ```bash
//! fe-sinus dump-config --store
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use sinus_daq::clock::SystemClock;
use sinus_daq::config::{FrontendSettings, DEFAULT_CONFIG_PATH};
use sinus_daq::controller::AcquisitionController;
use sinus_daq::encoder::decode;
use sinus_daq::logging;
use sinus_daq::runner::RunControl;

/// Events between two progress lines.
const REPORT_EVERY: u64 = 1000;

#[derive(Parser)]
#[command(name = "fe-sinus")]
#[command(about = "Synthetic sine digitizer frontend", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take one run
    Run {
        /// Run length in seconds; runs until Ctrl+C when omitted
        #[arg(long)]
        seconds: Option<f64>,

        /// Run number stamped into the logs
        #[arg(long, default_value = "1")]
        run_number: u32,
    },

    /// Print the effective settings as TOML
    DumpConfig {
        /// Also print the configuration store after key registration
        #[arg(long)]
        store: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = FrontendSettings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            seconds,
            run_number,
        } => {
            logging::init_from_settings(&settings)?;
            run(settings, seconds, run_number).await
        }
        Commands::DumpConfig { store } => dump_config(&settings, store),
    }
}

async fn run(settings: FrontendSettings, seconds: Option<f64>, run_number: u32) -> Result<()> {
    let store = Arc::new(settings.seed_store());
    let controller = Arc::new(AcquisitionController::new(
        store,
        Arc::new(SystemClock),
        settings.controller_options(),
    ));

    let mut host = RunControl::new(controller, &settings.frontend);
    host.initialize().context("initializing frontend")?;

    let events = host
        .start_run(run_number)
        .with_context(|| format!("starting run {run_number}"))?;
    let consumer = tokio::spawn(consume(events));

    match seconds {
        Some(seconds) => {
            let duration = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid run length {seconds}"))?;
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    let summary = host.shutdown().await?;
    let consumed = consumer.await.context("event consumer panicked")?;

    if let Some(summary) = summary {
        println!(
            "run {}: {} events, {} bytes, {} consumed",
            summary.run, summary.events, summary.bytes, consumed
        );
    }
    Ok(())
}

/// Stand-in for the event transport: checks and counts events.
async fn consume(mut events: mpsc::Receiver<Bytes>) -> u64 {
    let mut count = 0u64;
    while let Some(event) = events.recv().await {
        count += 1;
        match decode(&event) {
            Ok(decoded) if count == 1 || count % REPORT_EVERY == 0 => info!(
                event = decoded.metadata.event_counter,
                size = decoded.total_size,
                banks = decoded.bank_count,
                dc_offsets = ?decoded.dc_offsets,
                "Event received"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, size = event.len(), "Malformed event"),
        }
    }
    count
}

fn dump_config(settings: &FrontendSettings, with_store: bool) -> Result<()> {
    println!("{}", toml::to_string_pretty(settings)?);

    if with_store {
        let store = Arc::new(settings.seed_store());
        let controller = AcquisitionController::new(
            store.clone(),
            Arc::new(SystemClock),
            settings.controller_options(),
        );
        controller.initialize()?;
        println!("# configuration store");
        println!("{}", toml::to_string_pretty(&store.to_toml())?);
    }
    Ok(())
}
