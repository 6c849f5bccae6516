//! Safety Interlock
//!
//! Decides, once per tick, whether load generation is permitted.
//!
//! ```text
//!            discharging & battery > min
//!   Idle ───────────────────────────────► Stressing
//!    ▲  ◄─────────────────────────────────  │   ▲
//!    │   charger / battery low /            │   │ temp <= max - margin
//!    │   over temp (no hysteresis)          │   │ (power still ok)
//!    │                          over temp   ▼   │
//!    └──────────────────────────────────  CoolingDown
//!          charger / battery low
//! ```
//!
//! Battery and charger conditions always win over thermal recovery.

use drain_common::{DrainConfig, MetricSample};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterlockError {
    #[error("Battery status unavailable")]
    BatteryUnavailable,
}

/// Whether load generation is currently permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterlockState {
    #[default]
    Idle,
    Stressing,
    CoolingDown,
}

impl InterlockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterlockState::Idle => "idle",
            InterlockState::Stressing => "stressing",
            InterlockState::CoolingDown => "cooling down",
        }
    }
}

impl std::fmt::Display for InterlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Running on battery above the threshold
    Discharging,
    ChargerConnected,
    BatteryLow,
    OverTemperature,
    Cooled,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::Discharging => "discharging above threshold",
            TransitionReason::ChargerConnected => "charger connected",
            TransitionReason::BatteryLow => "battery at or below threshold",
            TransitionReason::OverTemperature => "temperature above maximum",
            TransitionReason::Cooled => "temperature back under resume point",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: InterlockState,
    pub to: InterlockState,
    pub reason: TransitionReason,
}

/// Thresholds the interlock evaluates against
#[derive(Debug, Clone, PartialEq)]
pub struct InterlockPolicy {
    pub min_battery_percent: f32,
    pub monitor_temperature: bool,
    pub max_temperature_celsius: f32,
    pub resume_temperature_celsius: f32,
    /// Over-temperature enters CoolingDown rather than Idle
    pub hysteresis: bool,
}

impl From<&DrainConfig> for InterlockPolicy {
    fn from(config: &DrainConfig) -> Self {
        Self {
            min_battery_percent: f32::from(config.min_battery_percent),
            monitor_temperature: config.monitor_temperature,
            max_temperature_celsius: f32::from(config.max_temperature_celsius),
            resume_temperature_celsius: config.resume_temperature_celsius(),
            hysteresis: config.thermal_hysteresis,
        }
    }
}

/// The process-wide interlock state machine
#[derive(Debug)]
pub struct Interlock {
    state: InterlockState,
    policy: InterlockPolicy,
}

impl Interlock {
    pub fn new(policy: InterlockPolicy) -> Self {
        Self {
            state: InterlockState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> InterlockState {
        self.state
    }

    pub fn policy(&self) -> &InterlockPolicy {
        &self.policy
    }

    /// Swap thresholds; only honoured while idle
    pub fn set_policy(&mut self, policy: InterlockPolicy) -> bool {
        if self.state != InterlockState::Idle {
            return false;
        }
        self.policy = policy;
        true
    }

    /// Evaluate the latest sample; `Ok(None)` when the state is unchanged
    pub fn evaluate(&mut self, sample: &MetricSample) -> Result<Option<Transition>, InterlockError> {
        let battery = sample.battery.ok_or(InterlockError::BatteryUnavailable)?;
        let p = &self.policy;

        let power_block = if battery.is_charging() {
            Some(TransitionReason::ChargerConnected)
        } else if battery.percent <= p.min_battery_percent {
            Some(TransitionReason::BatteryLow)
        } else {
            None
        };

        let temperature = sample.temperature();
        let overheated =
            p.monitor_temperature && temperature.is_some_and(|t| t > p.max_temperature_celsius);
        let cooled =
            !p.monitor_temperature || temperature.is_some_and(|t| t <= p.resume_temperature_celsius);

        let next = match (self.state, power_block) {
            (InterlockState::Idle, None) => {
                Some((InterlockState::Stressing, TransitionReason::Discharging))
            }
            (InterlockState::Idle, Some(_)) => None,

            (InterlockState::Stressing, Some(reason)) => Some((InterlockState::Idle, reason)),
            (InterlockState::Stressing, None) if overheated => {
                let to = if p.hysteresis {
                    InterlockState::CoolingDown
                } else {
                    InterlockState::Idle
                };
                Some((to, TransitionReason::OverTemperature))
            }
            (InterlockState::Stressing, None) => None,

            (InterlockState::CoolingDown, Some(reason)) => Some((InterlockState::Idle, reason)),
            (InterlockState::CoolingDown, None) if cooled => {
                Some((InterlockState::Stressing, TransitionReason::Cooled))
            }
            (InterlockState::CoolingDown, None) => None,
        };

        Ok(next.map(|(to, reason)| {
            let transition = Transition {
                from: self.state,
                to,
                reason,
            };
            self.state = to;
            transition
        }))
    }
}
