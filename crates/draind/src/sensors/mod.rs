//! Sensor Reader
//!
//! Produces one [`MetricSample`] per tick. Unavailable readings are encoded as
//! `None`; infrastructure failures surface as [`SensorError`] inside this
//! module and are logged, then treated as "unavailable this tick".
//!
//! Per-core load uses a fixed 1s sampling window, so a call to
//! [`SensorSource::sample`] takes at least that long on real hardware.

pub mod battery;
pub mod thermal;

pub use battery::BatteryBackend;
pub use thermal::ThermalProbe;

use chrono::Utc;
use drain_common::{BatteryReading, DrainConfig, MetricSample};
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::DrainError;

/// Load measurement window
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Infrastructure failure while reading a sensor
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("{tool} not found")]
    ToolMissing { tool: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} exited with status {code:?}")]
    ToolFailed { tool: String, code: Option<i32> },

    #[error("Unparsable output from {tool}")]
    Unparsable { tool: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can produce a metric sample each tick
#[allow(async_fn_in_trait)]
pub trait SensorSource {
    async fn sample(&mut self) -> MetricSample;
}

/// Sensors backed by the local host
pub struct HostSensors {
    system: System,
    disks: Disks,
    battery: BatteryBackend,
    thermal: ThermalProbe,
}

impl HostSensors {
    pub fn new(config: &DrainConfig) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            battery: BatteryBackend::detect(),
            thermal: ThermalProbe::new(config.thermal_command.clone()),
        }
    }

    /// Read the battery from somewhere other than the host default
    pub fn with_battery(mut self, battery: BatteryBackend) -> Self {
        self.battery = battery;
        self
    }

    /// Confirm a battery interface exists before anything is spawned
    pub async fn probe_battery(&mut self) -> Result<BatteryReading, DrainError> {
        match self.battery.read().await {
            Ok(Some(reading)) => Ok(reading),
            Ok(None) => Err(DrainError::NoBattery),
            Err(e) => {
                warn!("Battery probe failed: {}", e);
                Err(DrainError::NoBattery)
            }
        }
    }

    async fn read_core_loads(&mut self) -> Vec<f32> {
        self.system.refresh_cpu();
        tokio::time::sleep(SAMPLE_WINDOW).await;
        self.system.refresh_cpu();

        self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect()
    }

    fn read_memory(&mut self) -> (f32, Option<f32>) {
        self.system.refresh_memory();

        let memory = percent(self.system.used_memory(), self.system.total_memory()).unwrap_or(0.0);
        let swap = percent(self.system.used_swap(), self.system.total_swap());
        (memory, swap)
    }

    fn read_disk(&mut self) -> Option<f32> {
        self.disks.refresh();

        let disk = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| self.disks.list().first())?;

        let total = disk.total_space();
        percent(total.saturating_sub(disk.available_space()), total)
    }

    async fn read_battery(&mut self) -> Option<BatteryReading> {
        match self.battery.read().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Battery read failed: {}", e);
                None
            }
        }
    }
}

impl SensorSource for HostSensors {
    async fn sample(&mut self) -> MetricSample {
        let core_loads = self.read_core_loads().await;
        let (memory_percent, swap_percent) = self.read_memory();
        let disk_percent = self.read_disk();
        let battery = self.read_battery().await;
        let thermal = self.thermal.read().await;

        debug!(
            cores = core_loads.len(),
            memory = memory_percent,
            battery = ?battery.map(|b| b.percent),
            temperature = ?thermal.temperature_celsius,
            "Sampled host metrics"
        );

        MetricSample {
            timestamp: Utc::now(),
            core_loads,
            memory_percent,
            swap_percent,
            battery,
            thermal,
            disk_percent,
        }
    }
}

fn percent(used: u64, total: u64) -> Option<f32> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64 * 100.0) as f32)
}
