//! Battery readings
//!
//! Linux reads `/sys/class/power_supply`; macOS parses `pmset -g batt`.

use drain_common::BatteryReading;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::thermal::run_tool;
use super::SensorError;

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Where battery state comes from on this host
#[derive(Debug, Clone)]
pub enum BatteryBackend {
    /// sysfs power-supply class directory
    PowerSupply(PathBuf),
    /// `pmset -g batt`
    Pmset,
}

impl BatteryBackend {
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            BatteryBackend::Pmset
        } else {
            BatteryBackend::PowerSupply(PathBuf::from(POWER_SUPPLY_ROOT))
        }
    }

    /// `Ok(None)` means the host has no battery interface
    pub async fn read(&self) -> Result<Option<BatteryReading>, SensorError> {
        match self {
            BatteryBackend::PowerSupply(root) => read_power_supply(root),
            BatteryBackend::Pmset => {
                let argv = ["pmset".to_string(), "-g".to_string(), "batt".to_string()];
                let output = run_tool(&argv, super::thermal::TOOL_TIMEOUT).await?;
                Ok(parse_pmset(&output))
            }
        }
    }
}

/// Read the first battery under a power-supply class directory
pub fn read_power_supply(root: &Path) -> Result<Option<BatteryReading>, SensorError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut supplies: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    supplies.sort();

    let mut battery_dir = None;
    let mut external_power: Option<bool> = None;

    for dir in &supplies {
        let kind = read_trimmed(&dir.join("type"));
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match kind.as_deref() {
            Some("Battery") => {
                if battery_dir.is_none() {
                    battery_dir = Some(dir.clone());
                }
            }
            Some("Mains") | Some("USB") => {
                let online = read_trimmed(&dir.join("online")).as_deref() == Some("1");
                external_power = Some(external_power.unwrap_or(false) || online);
            }
            _ if name.starts_with("BAT") && battery_dir.is_none() => {
                battery_dir = Some(dir.clone());
            }
            _ => {}
        }
    }

    let Some(dir) = battery_dir else {
        return Ok(None);
    };

    let Some(percent) = read_trimmed(&dir.join("capacity")).and_then(|c| c.parse::<f32>().ok())
    else {
        return Err(SensorError::Unparsable {
            tool: dir.join("capacity").display().to_string(),
        });
    };

    let status = read_trimmed(&dir.join("status"));
    let charging = external_power.or_else(|| match status.as_deref() {
        Some("Charging") | Some("Full") | Some("Not charging") => Some(true),
        Some("Discharging") => Some(false),
        _ => None,
    });

    let seconds_remaining = match charging {
        Some(false) => remaining_seconds(&dir),
        _ => None,
    };

    Ok(Some(BatteryReading {
        percent: percent.clamp(0.0, 100.0),
        charging,
        seconds_remaining,
    }))
}

fn remaining_seconds(dir: &Path) -> Option<u64> {
    let read_u64 = |file: &str| read_trimmed(&dir.join(file)).and_then(|v| v.parse::<u64>().ok());

    let (stored, rate) = match (read_u64("energy_now"), read_u64("power_now")) {
        (Some(energy), Some(power)) => (energy, power),
        _ => (read_u64("charge_now")?, read_u64("current_now")?),
    };

    if rate == 0 {
        return None;
    }
    Some(stored * 3600 / rate)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Parse `pmset -g batt` output
pub fn parse_pmset(output: &str) -> Option<BatteryReading> {
    let mut lines = output.lines();
    let source = lines.next()?;
    let line = lines.find(|l| l.contains("InternalBattery"))?;

    let percent = line
        .split(|c: char| c.is_whitespace() || c == ';')
        .find_map(|token| token.strip_suffix('%'))
        .and_then(|p| p.parse::<f32>().ok())?;

    let charging = Some(source.contains("'AC Power'"));

    let seconds_remaining = match charging {
        Some(false) => parse_remaining(line),
        _ => None,
    };

    Some(BatteryReading {
        percent,
        charging,
        seconds_remaining,
    })
}

/// `3:12 remaining` -> seconds; `(no estimate)` -> None
fn parse_remaining(line: &str) -> Option<u64> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let idx = tokens.iter().position(|t| *t == "remaining")?;
    let (hours, minutes) = tokens.get(idx.checked_sub(1)?)?.split_once(':')?;
    let secs = hours.parse::<u64>().ok()? * 3600 + minutes.parse::<u64>().ok()? * 60;
    if secs == 0 {
        None
    } else {
        Some(secs)
    }
}
