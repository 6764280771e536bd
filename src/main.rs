//! CLI Entry Point for plant_daq
//!
//! Provides command-line interface for:
//! - Recording one plant run from a serial port to CSV
//! - Listing the serial ports the system can see
//!
//! # Usage
//!
//! Record a run:
//! ```bash
//! plant_daq run --port COM5 --baud 115200 --output-dir data
//! ```
//!
//! List ports:
//! ```bash
//! plant_daq ports
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plant_daq::config::{AcquisitionConfig, DEFAULT_CONFIG_FILE};
use plant_daq::logging::{self, OutputFormat, TracingConfig};
use plant_daq::session::run_session;
use plant_daq::transport::serial::list_ports;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "plant_daq")]
#[command(about = "Serial data logger for plant identification runs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one run until the device reports the end or Ctrl-C
    Run {
        /// Serial port (e.g. COM5, /dev/ttyUSB0)
        #[arg(long)]
        port: Option<String>,

        /// Baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Per-read timeout (e.g. "2s", "500ms")
        #[arg(long, value_parser = humantime_duration)]
        timeout: Option<Duration>,

        /// Directory for the CSV record
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List available serial ports
    Ports,
}

fn humantime_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AcquisitionConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration '{}'", cli.config.display()))?;

    if let Commands::Run {
        port,
        baud,
        timeout,
        output_dir,
    } = &cli.command
    {
        if let Some(port) = port {
            config.port = port.clone();
        }
        if let Some(baud) = baud {
            config.baud_rate = *baud;
        }
        if let Some(timeout) = timeout {
            config.read_timeout = *timeout;
        }
        if let Some(dir) = output_dir {
            config.output_dir = dir.clone();
        }
    }
    config.validate()?;

    let level = logging::parse_log_level(&config.log_level).map_err(anyhow::Error::msg)?;
    logging::init(
        TracingConfig::new(level)
            .with_format(cli.log_format)
            .verbose_metadata(cli.log_format == OutputFormat::Pretty),
    )
    .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run { .. } => record(&config),
        Commands::Ports => print_ports().map(|()| ExitCode::SUCCESS),
    }
}

/// Runs one session. A failed session has already been logged by the
/// library, so it only turns into a failing exit code here.
fn record(config: &AcquisitionConfig) -> Result<ExitCode> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    info!(
        port = %config.port,
        baud = config.baud_rate,
        "Starting acquisition. Press Ctrl-C to stop."
    );

    let Ok(report) = run_session(config, &stop) else {
        return Ok(ExitCode::FAILURE);
    };
    if let Some(path) = &report.output {
        info!(
            "{} samples ({} dropped) saved to '{}' in {:.1}s",
            report.samples_written,
            report.malformed_records,
            path.display(),
            report.duration.as_secs_f64()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        warn!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        println!("{}\t{:?}", port.port_name, port.port_type);
    }
    Ok(())
}
