//! Thermal, fan and power readings
//!
//! The primary source is a privileged sampler (`powermetrics` by default)
//! that prints line-oriented reports. Values are found by label substring and
//! taken from the first numeric token after the colon. Fallbacks: the
//! `osx-cpu-temp` helper, then hardware-monitor components via sysinfo.
//!
//! Every invocation gets one bounded wait; there are no retries. A missing
//! tool, timeout, non-zero exit or unparsable output leaves the reading `None`.

use drain_common::ThermalReading;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::Components;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::SensorError;

/// Budget for a single external tool invocation
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

const SAMPLER_ARGS: [&str; 4] = ["--samplers", "thermal,smc,cpu_power", "-i1", "-n1"];
const FALLBACK_TOOL: &str = "osx-cpu-temp";

/// Run a tool and return stdout, killing it if the budget runs out
pub async fn run_tool(argv: &[String], budget: Duration) -> Result<String, SensorError> {
    let (program, args) = argv.split_first().ok_or_else(|| SensorError::ToolMissing {
        tool: String::new(),
    })?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => SensorError::ToolMissing {
                tool: program.clone(),
            },
            _ => SensorError::Io(e),
        })?;

    let output = match timeout(budget, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(SensorError::Timeout {
                tool: program.clone(),
                secs: budget.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(SensorError::ToolFailed {
            tool: program.clone(),
            code: output.status.code(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Extract readings from a sampler report
pub fn parse_sampler_report(report: &str) -> ThermalReading {
    let mut reading = ThermalReading::default();

    for line in report.lines() {
        if reading.temperature_celsius.is_none() && line.contains("CPU die temperature") {
            reading.temperature_celsius = first_number_after_colon(line).map(|v| v as f32);
        } else if reading.fan_rpm.is_none() && line.contains("Fan") && line.contains("rpm") {
            reading.fan_rpm = first_number_after_colon(line).map(|v| v.round() as u32);
        } else if line.contains("mW") {
            let watts = first_number_after_colon(line).map(|mw| (mw / 1000.0) as f32);
            if line.contains("CPU Power") && reading.cpu_power_watts.is_none() {
                reading.cpu_power_watts = watts;
            } else if line.contains("GPU Power") && reading.gpu_power_watts.is_none() {
                reading.gpu_power_watts = watts;
            }
        }
    }

    reading
}

/// `"CPU die temperature: 61.23 C"` -> 61.23
fn first_number_after_colon(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once(':')?;
    rest.split_whitespace().next()?.parse::<f64>().ok()
}

/// Parse the fallback helper's single value, e.g. `"61.8°C"`
pub fn parse_fallback_temperature(output: &str) -> Option<f32> {
    output
        .trim()
        .trim_end_matches("°C")
        .trim_end_matches('C')
        .trim()
        .parse::<f32>()
        .ok()
}

/// Hottest CPU-like hardware-monitor component
fn hottest_cpu_component(components: &Components) -> Option<f32> {
    components
        .list()
        .iter()
        .filter(|c| {
            let label = c.label().to_lowercase();
            ["cpu", "core", "package", "tctl", "tdie"]
                .iter()
                .any(|key| label.contains(key))
        })
        .map(|c| c.temperature())
        .filter(|t| t.is_finite() && *t > 0.0)
        .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))))
}

/// Reads thermal state once per tick
pub struct ThermalProbe {
    command: Vec<String>,
    components: Option<Components>,
    sampler_reported: bool,
}

impl ThermalProbe {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            components: None,
            sampler_reported: false,
        }
    }

    pub async fn read(&mut self) -> ThermalReading {
        let mut reading = match self.read_sampler().await {
            Ok(reading) => reading,
            Err(e) => {
                self.report_sampler_error(&e);
                ThermalReading::default()
            }
        };

        if reading.temperature_celsius.is_none() {
            reading.temperature_celsius = self.read_fallback().await;
        }
        if reading.temperature_celsius.is_none() {
            reading.temperature_celsius = self.read_components();
        }

        reading
    }

    async fn read_sampler(&self) -> Result<ThermalReading, SensorError> {
        if self.command.is_empty() {
            return Err(SensorError::ToolMissing {
                tool: "thermal sampler".to_string(),
            });
        }

        let mut argv = self.command.clone();
        argv.extend(SAMPLER_ARGS.iter().map(|a| a.to_string()));

        let report = run_tool(&argv, TOOL_TIMEOUT).await?;
        let reading = parse_sampler_report(&report);
        if reading == ThermalReading::default() {
            return Err(SensorError::Unparsable {
                tool: self.command.join(" "),
            });
        }
        Ok(reading)
    }

    async fn read_fallback(&self) -> Option<f32> {
        match run_tool(&[FALLBACK_TOOL.to_string()], TOOL_TIMEOUT).await {
            Ok(output) => parse_fallback_temperature(&output),
            Err(e) => {
                debug!("Fallback temperature unavailable: {}", e);
                None
            }
        }
    }

    fn read_components(&mut self) -> Option<f32> {
        let components = self
            .components
            .get_or_insert_with(Components::new_with_refreshed_list);
        components.refresh();
        hottest_cpu_component(components)
    }

    // first failure is a warning, repeats are debug noise
    fn report_sampler_error(&mut self, e: &SensorError) {
        if self.sampler_reported {
            debug!("Thermal sampler unavailable: {}", e);
        } else {
            warn!("Thermal sampler unavailable, temperature may be missing: {}", e);
            self.sampler_reported = true;
        }
    }
}
