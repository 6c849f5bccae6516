//! Control Loop
//!
//! Owns every component and drives one tick per check interval:
//! sample, record, evaluate, start/stop the batch, reap, render.
//! Whatever ends the run (interrupt, the run limit, fatal sensor absence, a
//! panic unwinding through the supervisor) the live batch is stopped before
//! returning.

use drain_common::{DrainConfig, HistoryStore, MetricSample};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::display::{Display, StatusView};
use crate::error::DrainError;
use crate::interlock::{Interlock, InterlockPolicy, InterlockState, Transition};
use crate::sensors::SensorSource;
use crate::supervisor::{ProcessSpawner, WorkerSupervisor};

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The configured duration elapsed
    Completed,
    Interrupted,
    Failed,
}

impl RunEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEnd::Completed => "completed",
            RunEnd::Interrupted => "interrupted",
            RunEnd::Failed => "failed",
        }
    }
}

/// Reported once cleanup has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub end: RunEnd,
    pub elapsed: Duration,
    pub batches_started: usize,
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub transition: Option<Transition>,
    pub state: InterlockState,
}

pub struct ControlLoop<S, P, W>
where
    S: SensorSource,
    P: ProcessSpawner,
    W: Write,
{
    config: DrainConfig,
    sensors: S,
    history: HistoryStore,
    interlock: Interlock,
    supervisor: WorkerSupervisor<P>,
    display: Display<W>,
    /// Reloaded config waiting for an idle moment
    pending: Option<DrainConfig>,
    started: Instant,
    batches_started: usize,
}

impl<S, P, W> ControlLoop<S, P, W>
where
    S: SensorSource,
    P: ProcessSpawner,
    W: Write,
{
    pub fn new(config: DrainConfig, sensors: S, spawner: P, out: W) -> Self {
        Self {
            history: HistoryStore::new(config.history_capacity),
            interlock: Interlock::new(InterlockPolicy::from(&config)),
            supervisor: WorkerSupervisor::new(spawner),
            display: Display::new(out, config.display_mode, config.graph_height),
            sensors,
            pending: None,
            started: Instant::now(),
            batches_started: 0,
            config,
        }
    }

    pub fn state(&self) -> InterlockState {
        self.interlock.state()
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn supervisor(&self) -> &WorkerSupervisor<P> {
        &self.supervisor
    }

    pub fn display(&self) -> &Display<W> {
        &self.display
    }

    /// Run ticks until `shutdown` resolves, the run limit passes or a tick
    /// fails, then stop the batch and report
    pub async fn run<F>(
        &mut self,
        shutdown: F,
        mut reloads: mpsc::Receiver<DrainConfig>,
    ) -> Result<RunSummary, DrainError>
    where
        F: Future<Output = ()>,
    {
        // fixed at start; a reload does not move the deadline
        let limit = self.config.run_limit();
        info!(
            interval = self.config.effective_check_interval(),
            min_battery = self.config.min_battery_percent,
            max_temp = self.config.max_temperature_celsius,
            limit_secs = ?limit.map(|l| l.as_secs()),
            "Control loop started"
        );

        let deadline = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            result = self.tick_forever(&mut reloads) => result.map(|_| RunEnd::Failed),
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(RunEnd::Interrupted)
            }
            _ = deadline => {
                info!("Run limit reached");
                Ok(RunEnd::Completed)
            }
        };

        let report = self.supervisor.stop_batch();
        if !report.failed.is_empty() {
            warn!("{} worker(s) could not be killed on shutdown", report.failed.len());
        }

        let summary = RunSummary {
            end: result.as_ref().copied().unwrap_or(RunEnd::Failed),
            elapsed: self.started.elapsed(),
            batches_started: self.batches_started,
        };
        info!(
            end = summary.end.as_str(),
            elapsed_secs = summary.elapsed.as_secs(),
            batches = summary.batches_started,
            "Run finished"
        );
        self.display.summary(&summary);

        result.map(|_| summary)
    }

    async fn tick_forever(
        &mut self,
        reloads: &mut mpsc::Receiver<DrainConfig>,
    ) -> Result<std::convert::Infallible, DrainError> {
        loop {
            self.tick().await?;

            let interval = Duration::from_secs(self.config.effective_check_interval());
            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    Some(next) = reloads.recv() => self.stage_config(next),
                }
            }
        }
    }

    /// One pass of the loop
    pub async fn tick(&mut self) -> Result<TickOutcome, DrainError> {
        let sample = self.sensors.sample().await;
        self.history.record(&sample);

        let transition = match self.interlock.evaluate(&sample) {
            Ok(transition) => transition,
            Err(e) => {
                error!("Interlock cannot evaluate: {}", e);
                self.supervisor.stop_batch();
                return Err(e.into());
            }
        };

        if let Some(transition) = transition {
            info!(
                from = %transition.from,
                to = %transition.to,
                battery = ?sample.battery_percent(),
                temperature = ?sample.temperature(),
                "Interlock transition: {}",
                transition.reason.as_str()
            );
            self.apply_transition(&transition);
        }

        self.supervisor.reap();
        self.apply_pending();
        self.render(&sample);

        Ok(TickOutcome {
            transition,
            state: self.interlock.state(),
        })
    }

    fn apply_transition(&mut self, transition: &Transition) {
        if transition.to == InterlockState::Stressing {
            match self.supervisor.start_batch(&self.config) {
                Ok(_) => self.batches_started += 1,
                Err(e) => warn!("Not starting a new batch: {}", e),
            }
        } else if transition.from == InterlockState::Stressing
            || transition.to == InterlockState::Idle
        {
            self.supervisor.stop_batch();
        }
    }

    /// Queue a reloaded config; applied once the loop is idle
    pub fn stage_config(&mut self, next: DrainConfig) {
        self.config.warn_fixed_fields(&next);
        info!("Staged reloaded configuration");
        self.pending = Some(next);
        self.apply_pending();
    }

    fn apply_pending(&mut self) {
        if self.pending.is_none()
            || self.interlock.state() != InterlockState::Idle
            || self.supervisor.is_active()
        {
            return;
        }
        let Some(mut next) = self.pending.take() else {
            return;
        };

        next.history_capacity = self.config.history_capacity;
        if !self.interlock.set_policy(InterlockPolicy::from(&next)) {
            self.pending = Some(next);
            return;
        }
        self.display.set_layout(next.display_mode, next.graph_height);
        self.config = next;
        info!(
            interval = self.config.effective_check_interval(),
            min_battery = self.config.min_battery_percent,
            max_temp = self.config.max_temperature_celsius,
            "Applied reloaded configuration"
        );
    }

    fn render(&mut self, sample: &MetricSample) {
        let workers = self.supervisor.role_counts();
        let view = StatusView {
            sample,
            history: &self.history,
            state: self.interlock.state(),
            workers: &workers,
            elapsed: self.started.elapsed(),
        };
        self.display.render(&view);
    }
}
