//! Drain Common - Shared types for the stress supervisor
//!
//! Host-independent building blocks used by `draind`:
//! configuration, metric samples, bounded history, and the text graph renderer.

pub mod config;
pub mod error;
pub mod graph;
pub mod history;
pub mod sample;

pub use config::{
    ConfigOverrides, DisplayMode, DrainConfig, PayloadCommand, WorkerRole, SCRATCH_PLACEHOLDER,
};
pub use error::ConfigError;
pub use graph::{is_placeholder, render, GRAPH_FAILED, NO_DATA};
pub use history::{HistorySeries, HistoryStore, Metric};
pub use sample::{BatteryReading, MetricSample, ThermalReading};
