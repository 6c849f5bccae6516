//! Metric samples produced once per tick

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Battery state at sampling time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    /// Charge level, 0-100
    pub percent: f32,
    /// External power present; `None` when the host cannot tell
    pub charging: Option<bool>,
    /// Estimated seconds until empty; `None` when indeterminate
    pub seconds_remaining: Option<u64>,
}

impl BatteryReading {
    /// Unknown charge state counts as discharging
    pub fn is_charging(&self) -> bool {
        self.charging.unwrap_or(false)
    }
}

/// Readings from the privileged thermal/power sampler
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThermalReading {
    pub temperature_celsius: Option<f32>,
    pub fan_rpm: Option<u32>,
    pub cpu_power_watts: Option<f32>,
    pub gpu_power_watts: Option<f32>,
}

/// One immutable snapshot of host telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    /// Per-core load percentages, in core order
    pub core_loads: Vec<f32>,
    pub memory_percent: f32,
    pub swap_percent: Option<f32>,
    pub battery: Option<BatteryReading>,
    pub thermal: ThermalReading,
    pub disk_percent: Option<f32>,
}

impl MetricSample {
    /// Mean load across all cores, 0 when no cores were read
    pub fn average_load(&self) -> f32 {
        if self.core_loads.is_empty() {
            return 0.0;
        }
        self.core_loads.iter().sum::<f32>() / self.core_loads.len() as f32
    }

    pub fn temperature(&self) -> Option<f32> {
        self.thermal.temperature_celsius
    }

    pub fn battery_percent(&self) -> Option<f32> {
        self.battery.map(|b| b.percent)
    }
}
