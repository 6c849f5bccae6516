//! draind - Battery drain stress supervisor
//!
//! Exits non-zero when the run is impossible (bad config, no battery);
//! otherwise runs until interrupted or the run limit passes, and always kills
//! its workers first.

use anyhow::{Context, Result};
use clap::Parser;
use drain_common::DrainConfig;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use draind::cli::Cli;
use draind::signals::{spawn_reloader, Hangup, ShutdownSignals};
use draind::{ControlLoop, HostSensors, OsSpawner};

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("Invalid log level '{}'", cli.log_level))?,
    };

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("draind v{} starting", env!("CARGO_PKG_VERSION"));

    let overrides = cli.overrides();
    let config = DrainConfig::load(cli.config.as_deref(), &overrides)
        .context("Failed to load configuration")?;

    if config.check_interval_was_clamped() {
        warn!(
            "Check interval {}s is below the minimum, using {}s",
            config.check_interval_seconds,
            config.effective_check_interval()
        );
    }

    // before any worker exists, so no signal can skip cleanup
    let hangup = match cli.config {
        Some(_) => Hangup::Reload,
        None => Hangup::Shutdown,
    };
    let signals =
        ShutdownSignals::register(hangup).context("Failed to install signal handlers")?;

    let mut sensors = HostSensors::new(&config);
    let battery = sensors
        .probe_battery()
        .await
        .context("Cannot run without a battery")?;
    info!(
        percent = battery.percent,
        charging = battery.is_charging(),
        "Battery detected"
    );

    let (reload_tx, reload_rx) = mpsc::channel(4);
    match cli.config.clone() {
        Some(path) => spawn_reloader(path, overrides, reload_tx)
            .context("Failed to install SIGHUP handler")?,
        None => drop(reload_tx),
    }

    let shutdown = async move {
        let name = signals.wait().await;
        info!("{} received, shutting down", name);
    };

    let mut control = ControlLoop::new(config, sensors, OsSpawner, io::stdout());
    let summary = control
        .run(shutdown, reload_rx)
        .await
        .context("Supervisor stopped")?;

    info!(end = summary.end.as_str(), "Shutdown complete");
    Ok(())
}
