//! Worker Supervisor
//!
//! Sole owner of the live worker set. Starts one batch per stressing episode,
//! kills it on request, and guarantees that no worker outlives the supervisor:
//! [`WorkerSupervisor::stop_batch`] is idempotent and also runs on `Drop`.
//!
//! Failure policy:
//! - Optional roles (GPU, IO) that fail to spawn are logged and skipped
//! - Mandatory CPU spawn failures are reported; the batch keeps what started
//! - A kill failure is recorded and never stops the remaining kills; the
//!   handle is retried once more when the supervisor is dropped
//! - A worker whose leader exits on its own still has its group killed

pub mod spawner;

pub use spawner::{Liveness, OsProcess, OsSpawner, ProcessSpawner, WorkerProcess};

use drain_common::{DrainConfig, WorkerRole};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("A batch is already active with {live} live worker(s)")]
    BatchAlreadyActive { live: usize },
}

/// One spawned worker owned by the supervisor
#[derive(Debug)]
struct WorkerHandle<P> {
    role: WorkerRole,
    pid: u32,
    process: P,
    started_at: Instant,
}

/// Result of starting a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub started: BTreeMap<WorkerRole, usize>,
    pub failed: Vec<SpawnFailure>,
}

impl BatchReport {
    pub fn total_started(&self) -> usize {
        self.started.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnFailure {
    pub role: WorkerRole,
    pub error: String,
}

/// Result of stopping a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub killed: usize,
    pub failed: Vec<KillFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillFailure {
    pub role: WorkerRole,
    pub pid: u32,
    pub error: String,
}

/// A worker that exited without being asked to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitedWorker {
    pub role: WorkerRole,
    pub pid: u32,
    pub code: Option<i32>,
}

pub struct WorkerSupervisor<S: ProcessSpawner> {
    spawner: S,
    handles: Vec<WorkerHandle<S::Process>>,
    /// Workers whose kill failed; termination never confirmed
    unconfirmed: Vec<WorkerHandle<S::Process>>,
    /// A batch was started and not yet stopped
    active: bool,
}

impl<S: ProcessSpawner> WorkerSupervisor<S> {
    pub fn new(spawner: S) -> Self {
        Self {
            spawner,
            handles: Vec::new(),
            unconfirmed: Vec::new(),
            active: false,
        }
    }

    /// Spawn one batch of workers for every enabled role
    pub fn start_batch(&mut self, config: &DrainConfig) -> Result<BatchReport, SupervisorError> {
        if self.active {
            return Err(SupervisorError::BatchAlreadyActive {
                live: self.handles.len(),
            });
        }

        if let Err(e) = std::fs::create_dir_all(&config.scratch_dir) {
            error!(
                "Failed to create scratch directory {}: {}",
                config.scratch_dir.display(),
                e
            );
        }

        let mut report = BatchReport::default();
        for role in config.enabled_roles() {
            let Some(command) = config.payload_for(role) else {
                warn!("No command configured for {} worker, skipping", role);
                continue;
            };

            for _ in 0..config.workers_for(role) {
                match self.spawner.spawn(role, &command, &config.scratch_dir) {
                    Ok(process) => {
                        let pid = process.id();
                        debug!(role = %role, pid, "Started worker");
                        self.handles.push(WorkerHandle {
                            role,
                            pid,
                            process,
                            started_at: Instant::now(),
                        });
                        *report.started.entry(role).or_default() += 1;
                    }
                    Err(e) => {
                        if role.is_optional() {
                            warn!("Failed to start {} worker, skipping: {}", role, e);
                        } else {
                            error!("Failed to start {} worker: {}", role, e);
                        }
                        report.failed.push(SpawnFailure {
                            role,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        self.active = true;
        info!(
            "Started batch: {} worker(s) running, {} failed to start",
            report.total_started(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Kill every tracked worker; a no-op when nothing is active
    pub fn stop_batch(&mut self) -> StopReport {
        let mut report = StopReport::default();
        if !self.active && self.handles.is_empty() {
            return report;
        }

        for mut handle in self.handles.drain(..) {
            match handle.process.kill() {
                Ok(()) => {
                    debug!(
                        role = %handle.role,
                        pid = handle.pid,
                        "Killed worker after {}s",
                        handle.started_at.elapsed().as_secs()
                    );
                    report.killed += 1;
                }
                Err(e) => {
                    error!("Failed to kill {} worker {}: {}", handle.role, handle.pid, e);
                    report.failed.push(KillFailure {
                        role: handle.role,
                        pid: handle.pid,
                        error: e.to_string(),
                    });
                    self.unconfirmed.push(handle);
                }
            }
        }

        self.active = false;
        info!(
            "Stopped batch: {} killed, {} kill failure(s)",
            report.killed,
            report.failed.len()
        );
        report
    }

    /// Drop workers that exited on their own, killing anything they left behind
    pub fn reap(&mut self) -> Vec<ExitedWorker> {
        let mut exited = Vec::new();

        self.handles.retain_mut(|handle| match handle.process.poll() {
            Ok(Liveness::Running) => true,
            Ok(Liveness::Exited(code)) => {
                warn!(
                    "{} worker {} exited unexpectedly (code {:?})",
                    handle.role, handle.pid, code
                );
                if let Err(e) = handle.process.kill() {
                    error!(
                        "Failed to clean up after {} worker {}: {}",
                        handle.role, handle.pid, e
                    );
                    return true;
                }
                exited.push(ExitedWorker {
                    role: handle.role,
                    pid: handle.pid,
                    code,
                });
                false
            }
            Err(e) => {
                warn!("Failed to poll {} worker {}: {}", handle.role, handle.pid, e);
                true
            }
        });

        exited
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn live_count(&self) -> usize {
        self.handles.len()
    }

    /// Workers whose kill failed and have not been retried yet
    pub fn unconfirmed_count(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn role_counts(&self) -> BTreeMap<WorkerRole, usize> {
        let mut counts = BTreeMap::new();
        for handle in &self.handles {
            *counts.entry(handle.role).or_default() += 1;
        }
        counts
    }
}

impl<S: ProcessSpawner> Drop for WorkerSupervisor<S> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!(
                "Supervisor dropped with {} live worker(s), killing",
                self.handles.len()
            );
            self.stop_batch();
        }

        for mut handle in self.unconfirmed.drain(..) {
            match handle.process.kill() {
                Ok(()) => info!("Killed {} worker {} on retry", handle.role, handle.pid),
                Err(e) => error!(
                    "{} worker {} may still be running: {}",
                    handle.role, handle.pid, e
                ),
            }
        }
    }
}
