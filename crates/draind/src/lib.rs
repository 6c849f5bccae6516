//! draind - battery drain stress supervisor
//!
//! Samples the host, gates a batch of load-generating workers on battery and
//! temperature, and draws the telemetry as a rolling text dashboard.

pub mod cli;
pub mod control;
pub mod display;
pub mod error;
pub mod interlock;
pub mod sensors;
pub mod signals;
pub mod supervisor;

pub use control::{ControlLoop, RunEnd, RunSummary, TickOutcome};
pub use display::{Display, StatusView};
pub use error::DrainError;
pub use interlock::{
    Interlock, InterlockError, InterlockPolicy, InterlockState, Transition, TransitionReason,
};
pub use sensors::{HostSensors, SensorError, SensorSource};
pub use supervisor::{
    Liveness, OsSpawner, ProcessSpawner, SupervisorError, WorkerProcess, WorkerSupervisor,
};
