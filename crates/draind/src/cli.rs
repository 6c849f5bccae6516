//! CLI - Command-line argument parsing
//!
//! Flags override the config file field by field.

use clap::Parser;
use drain_common::{ConfigOverrides, DisplayMode, PayloadCommand};
use std::path::PathBuf;

/// Battery drain stress supervisor
#[derive(Parser, Debug)]
#[command(name = "draind")]
#[command(about = "Load the machine while on battery, stop before it is empty or too hot", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (TOML, or JSON when the name ends in .json)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Stop stressing at or below this battery percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub min_battery: Option<u8>,

    /// Seconds between checks (minimum 2)
    #[arg(long)]
    pub interval: Option<u64>,

    /// CPU workers per batch
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub cores: Option<u64>,

    /// Also run the GPU payload (requires --gpu-path)
    #[arg(long)]
    pub enable_gpu: bool,

    /// GPU stress executable
    #[arg(long)]
    pub gpu_path: Option<PathBuf>,

    /// Disable temperature monitoring
    #[arg(long)]
    pub no_temp_check: bool,

    /// Maximum temperature in °C before backing off
    #[arg(long)]
    pub max_temp: Option<u16>,

    /// Also run the disk IO payload
    #[arg(long)]
    pub enable_io: bool,

    /// Replace the IO payload command line
    #[arg(long)]
    pub io_command: Option<String>,

    /// Replace the CPU payload command line
    #[arg(long)]
    pub cpu_command: Option<String>,

    /// Stop after this many minutes
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: Option<u64>,

    /// History points kept per metric
    #[arg(long)]
    pub history: Option<usize>,

    /// One status line per tick instead of the dashboard
    #[arg(long)]
    pub compact: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Flags that were actually given, as config overrides
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            min_battery_percent: self.min_battery,
            check_interval_seconds: self.interval,
            num_workers_per_role: self.cores.map(|n| n as usize),
            enable_gpu_worker: self.enable_gpu.then_some(true),
            gpu_path: self.gpu_path.clone(),
            enable_io_worker: self.enable_io.then_some(true),
            monitor_temperature: self.no_temp_check.then_some(false),
            max_temperature_celsius: self.max_temp,
            history_capacity: self.history,
            display_mode: self.compact.then_some(DisplayMode::Compact),
            cpu_command: self.cpu_command.as_deref().and_then(PayloadCommand::parse),
            io_command: self.io_command.as_deref().and_then(PayloadCommand::parse),
            duration_minutes: self.duration,
        }
    }
}
