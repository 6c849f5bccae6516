//! Drain Configuration
//!
//! Recognized options for one supervisor run. Loaded once at startup from an
//! optional structured file (TOML, or JSON when the path ends in `.json`),
//! then overlaid with command-line overrides. Flags always win.
//!
//! Key aliases accept the field names used by older JSON configs
//! (`min_battery`, `check_interval`, `num_cores`, ...).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Replaced by the scratch directory in payload arguments
pub const SCRATCH_PLACEHOLDER: &str = "{scratch}";

/// Shortest tick interval that leaves room for the 1s load sampling window
pub const MIN_CHECK_INTERVAL_SECS: u64 = 2;

/// Role a worker process plays in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Cpu,
    Gpu,
    Io,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Cpu => "cpu",
            WorkerRole::Gpu => "gpu",
            WorkerRole::Io => "io",
        }
    }

    /// Whether a spawn failure for this role degrades silently
    pub fn is_optional(&self) -> bool {
        !matches!(self, WorkerRole::Cpu)
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How each tick is drawn on the render sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Full-screen redraw with history graphs
    #[default]
    Dashboard,
    /// One stats line per tick
    Compact,
}

/// External command executed by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; the scratch directory when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl PayloadCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
        }
    }

    /// Parse a whitespace-separated command line (no shell quoting)
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?.to_string();
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
            working_dir: None,
        })
    }

    /// Arguments with the scratch placeholder substituted
    pub fn resolved_args(&self, scratch_dir: &Path) -> Vec<String> {
        let scratch = scratch_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(SCRATCH_PLACEHOLDER, &scratch))
            .collect()
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Complete supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Stop stressing at or below this battery percentage
    #[serde(default = "default_min_battery", alias = "min_battery")]
    pub min_battery_percent: u8,

    /// Seconds between ticks
    #[serde(default = "default_check_interval", alias = "check_interval")]
    pub check_interval_seconds: u64,

    /// CPU workers started per batch
    #[serde(default = "default_workers_per_role", alias = "num_cores")]
    pub num_workers_per_role: usize,

    #[serde(default, alias = "enable_gpu")]
    pub enable_gpu_worker: bool,

    /// GPU stress executable (required when the GPU worker is enabled)
    #[serde(default, alias = "gpu_test_path")]
    pub gpu_path: Option<PathBuf>,

    #[serde(default, alias = "enable_io")]
    pub enable_io_worker: bool,

    #[serde(default = "default_monitor_temperature", alias = "monitor_temp")]
    pub monitor_temperature: bool,

    #[serde(default = "default_max_temperature", alias = "max_temp_celsius")]
    pub max_temperature_celsius: u16,

    /// Resume only once temperature is this far below the maximum
    #[serde(default = "default_cooldown_margin")]
    pub cooldown_margin_celsius: u16,

    /// Thermal trips enter CoolingDown instead of Idle
    #[serde(default = "default_thermal_hysteresis")]
    pub thermal_hysteresis: bool,

    /// Points kept per history series
    #[serde(default = "default_history_capacity", alias = "history_points")]
    pub history_capacity: usize,

    /// Rows per history graph
    #[serde(default = "default_graph_height")]
    pub graph_height: usize,

    #[serde(default)]
    pub display_mode: DisplayMode,

    /// Working directory handed to workers
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_cpu_command")]
    pub cpu_command: PayloadCommand,

    #[serde(default = "default_io_command")]
    pub io_command: PayloadCommand,

    /// Privileged sampler invocation (thermal, fan, power)
    #[serde(default = "default_thermal_command")]
    pub thermal_command: Vec<String>,

    /// End the run after this many minutes; unbounded when unset
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<u64>,
}

fn default_min_battery() -> u8 {
    5
}

fn default_check_interval() -> u64 {
    10
}

fn default_workers_per_role() -> usize {
    num_cpus::get()
}

fn default_monitor_temperature() -> bool {
    true
}

fn default_max_temperature() -> u16 {
    90
}

fn default_cooldown_margin() -> u16 {
    5
}

fn default_thermal_hysteresis() -> bool {
    true
}

fn default_history_capacity() -> usize {
    60
}

fn default_graph_height() -> usize {
    10
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("draind")
}

fn default_cpu_command() -> PayloadCommand {
    // Non-cooperative busy loop; stdout is discarded by the spawner
    PayloadCommand::new("yes", &[])
}

fn default_io_command() -> PayloadCommand {
    PayloadCommand::new(
        "sh",
        &[
            "-c",
            "while :; do dd if=/dev/zero of={scratch}/drain-io.bin bs=1048576 count=256 2>/dev/null; done",
        ],
    )
}

fn default_thermal_command() -> Vec<String> {
    vec!["sudo".to_string(), "-n".to_string(), "powermetrics".to_string()]
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            min_battery_percent: default_min_battery(),
            check_interval_seconds: default_check_interval(),
            num_workers_per_role: default_workers_per_role(),
            enable_gpu_worker: false,
            gpu_path: None,
            enable_io_worker: false,
            monitor_temperature: default_monitor_temperature(),
            max_temperature_celsius: default_max_temperature(),
            cooldown_margin_celsius: default_cooldown_margin(),
            thermal_hysteresis: default_thermal_hysteresis(),
            history_capacity: default_history_capacity(),
            graph_height: default_graph_height(),
            display_mode: DisplayMode::default(),
            scratch_dir: default_scratch_dir(),
            cpu_command: default_cpu_command(),
            io_command: default_io_command(),
            thermal_command: default_thermal_command(),
            duration_minutes: None,
        }
    }
}

/// Values supplied on the command line; `None` leaves the file value alone
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub min_battery_percent: Option<u8>,
    pub check_interval_seconds: Option<u64>,
    pub num_workers_per_role: Option<usize>,
    pub enable_gpu_worker: Option<bool>,
    pub gpu_path: Option<PathBuf>,
    pub enable_io_worker: Option<bool>,
    pub monitor_temperature: Option<bool>,
    pub max_temperature_celsius: Option<u16>,
    pub history_capacity: Option<usize>,
    pub display_mode: Option<DisplayMode>,
    pub cpu_command: Option<PayloadCommand>,
    pub io_command: Option<PayloadCommand>,
    pub duration_minutes: Option<u64>,
}

impl DrainConfig {
    /// Read a config file, choosing the format by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Build the effective configuration: file (or defaults), then overrides
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Overlay command-line values
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        let o = overrides;
        if let Some(v) = o.min_battery_percent {
            self.min_battery_percent = v;
        }
        if let Some(v) = o.check_interval_seconds {
            self.check_interval_seconds = v;
        }
        if let Some(v) = o.num_workers_per_role {
            self.num_workers_per_role = v;
        }
        if let Some(v) = o.enable_gpu_worker {
            self.enable_gpu_worker = v;
        }
        if let Some(v) = &o.gpu_path {
            self.gpu_path = Some(v.clone());
        }
        if let Some(v) = o.enable_io_worker {
            self.enable_io_worker = v;
        }
        if let Some(v) = o.monitor_temperature {
            self.monitor_temperature = v;
        }
        if let Some(v) = o.max_temperature_celsius {
            self.max_temperature_celsius = v;
        }
        if let Some(v) = o.history_capacity {
            self.history_capacity = v;
        }
        if let Some(v) = o.display_mode {
            self.display_mode = v;
        }
        if let Some(v) = &o.cpu_command {
            self.cpu_command = v.clone();
        }
        if let Some(v) = &o.io_command {
            self.io_command = v.clone();
        }
        if let Some(v) = o.duration_minutes {
            self.duration_minutes = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_battery_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "min_battery_percent must be 0-100, got {}",
                self.min_battery_percent
            )));
        }
        if self.num_workers_per_role == 0 {
            return Err(ConfigError::Invalid(
                "num_workers_per_role must be at least 1".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.enable_gpu_worker && self.gpu_path.is_none() {
            return Err(ConfigError::Invalid(
                "gpu_path is required when the GPU worker is enabled".to_string(),
            ));
        }
        if self.cooldown_margin_celsius >= self.max_temperature_celsius {
            return Err(ConfigError::Invalid(format!(
                "cooldown margin {}°C must be below max temperature {}°C",
                self.cooldown_margin_celsius, self.max_temperature_celsius
            )));
        }
        if self.duration_minutes == Some(0) {
            return Err(ConfigError::Invalid(
                "duration_minutes must be at least 1".to_string(),
            ));
        }
        if self.cpu_command.program.is_empty() {
            return Err(ConfigError::Invalid("cpu_command is empty".to_string()));
        }
        Ok(())
    }

    /// Tick interval clamped to the minimum the sampling window allows
    pub fn effective_check_interval(&self) -> u64 {
        self.check_interval_seconds.max(MIN_CHECK_INTERVAL_SECS)
    }

    /// Run limit, if any
    pub fn run_limit(&self) -> Option<Duration> {
        self.duration_minutes
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn check_interval_was_clamped(&self) -> bool {
        self.check_interval_seconds != self.effective_check_interval()
    }

    /// Temperature at or below which a cooled-down run may resume
    pub fn resume_temperature_celsius(&self) -> f32 {
        f32::from(self.max_temperature_celsius.saturating_sub(self.cooldown_margin_celsius))
    }

    /// Roles started per batch, in spawn order
    pub fn enabled_roles(&self) -> Vec<WorkerRole> {
        let mut roles = vec![WorkerRole::Cpu];
        if self.enable_gpu_worker {
            roles.push(WorkerRole::Gpu);
        }
        if self.enable_io_worker {
            roles.push(WorkerRole::Io);
        }
        roles
    }

    /// Number of workers a role gets per batch
    pub fn workers_for(&self, role: WorkerRole) -> usize {
        match role {
            WorkerRole::Cpu => self.num_workers_per_role,
            WorkerRole::Gpu | WorkerRole::Io => 1,
        }
    }

    /// Command mapped to a role, if one is configured
    pub fn payload_for(&self, role: WorkerRole) -> Option<PayloadCommand> {
        match role {
            WorkerRole::Cpu => Some(self.cpu_command.clone()),
            WorkerRole::Io => Some(self.io_command.clone()),
            WorkerRole::Gpu => {
                let path = self.gpu_path.as_ref()?;
                Some(PayloadCommand {
                    program: path.to_string_lossy().to_string(),
                    args: vec!["/test=fur".to_string()],
                    working_dir: path
                        .parent()
                        .filter(|p| !p.as_os_str().is_empty())
                        .map(Path::to_path_buf),
                })
            }
        }
    }

    /// Log settings a reloaded config cannot change mid-run
    pub fn warn_fixed_fields(&self, next: &DrainConfig) {
        if self.history_capacity != next.history_capacity {
            warn!(
                "history_capacity is fixed for the run; keeping {} (requested {})",
                self.history_capacity, next.history_capacity
            );
        }
    }
}
