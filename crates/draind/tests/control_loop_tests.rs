//! Control loop behaviour against scripted sensors and fake workers

use chrono::Utc;
use drain_common::{
    BatteryReading, DisplayMode, DrainConfig, Metric, MetricSample, PayloadCommand,
    ThermalReading, WorkerRole,
};
use draind::{
    ControlLoop, DrainError, InterlockError, InterlockState, Liveness, ProcessSpawner, RunEnd,
    SensorSource, TransitionReason, WorkerProcess,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays samples in order, repeating the last one forever
struct ScriptedSensors {
    script: VecDeque<MetricSample>,
    last: Option<MetricSample>,
    taken: Rc<Cell<usize>>,
    /// This sample (1-based) hangs for an hour before returning
    stall_on: Option<usize>,
}

impl ScriptedSensors {
    fn new(script: Vec<MetricSample>) -> Self {
        Self {
            script: script.into(),
            last: None,
            taken: Rc::new(Cell::new(0)),
            stall_on: None,
        }
    }
}

impl SensorSource for ScriptedSensors {
    async fn sample(&mut self) -> MetricSample {
        self.taken.set(self.taken.get() + 1);
        if self.stall_on == Some(self.taken.get()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(next) = self.script.pop_front() {
            self.last = Some(next);
        }
        self.last.clone().unwrap_or_else(|| reading(None, false, None))
    }
}

#[derive(Default)]
struct Ledger {
    next_pid: u32,
    alive: HashSet<u32>,
    spawned: usize,
    killed: usize,
}

#[derive(Default, Clone)]
struct FakeSpawner {
    ledger: Rc<RefCell<Ledger>>,
}

struct FakeProcess {
    pid: u32,
    ledger: Rc<RefCell<Ledger>>,
}

impl WorkerProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn kill(&mut self) -> io::Result<()> {
        let mut ledger = self.ledger.borrow_mut();
        if ledger.alive.remove(&self.pid) {
            ledger.killed += 1;
        }
        Ok(())
    }

    fn poll(&mut self) -> io::Result<Liveness> {
        if self.ledger.borrow().alive.contains(&self.pid) {
            Ok(Liveness::Running)
        } else {
            Ok(Liveness::Exited(Some(137)))
        }
    }
}

impl ProcessSpawner for FakeSpawner {
    type Process = FakeProcess;

    fn spawn(
        &mut self,
        _role: WorkerRole,
        _command: &PayloadCommand,
        _scratch_dir: &Path,
    ) -> io::Result<FakeProcess> {
        let mut ledger = self.ledger.borrow_mut();
        ledger.next_pid += 1;
        ledger.spawned += 1;
        let pid = ledger.next_pid;
        ledger.alive.insert(pid);
        Ok(FakeProcess {
            pid,
            ledger: Rc::clone(&self.ledger),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn reading(percent: Option<f32>, charging: bool, temperature: Option<f32>) -> MetricSample {
    MetricSample {
        timestamp: Utc::now(),
        core_loads: vec![50.0, 60.0],
        memory_percent: 30.0,
        swap_percent: None,
        battery: percent.map(|percent| BatteryReading {
            percent,
            charging: Some(charging),
            seconds_remaining: None,
        }),
        thermal: ThermalReading {
            temperature_celsius: temperature,
            ..Default::default()
        },
        disk_percent: Some(40.0),
    }
}

fn on_battery(percent: f32, temperature: f32) -> MetricSample {
    reading(Some(percent), false, Some(temperature))
}

fn config(scratch: &TempDir) -> DrainConfig {
    DrainConfig {
        num_workers_per_role: 2,
        scratch_dir: scratch.path().to_path_buf(),
        display_mode: DisplayMode::Compact,
        ..DrainConfig::default()
    }
}

type TestLoop = ControlLoop<ScriptedSensors, FakeSpawner, Vec<u8>>;

fn control_loop(scratch: &TempDir, script: Vec<MetricSample>) -> (TestLoop, Rc<RefCell<Ledger>>) {
    let spawner = FakeSpawner::default();
    let ledger = Rc::clone(&spawner.ledger);
    let control = ControlLoop::new(
        config(scratch),
        ScriptedSensors::new(script),
        spawner,
        Vec::new(),
    );
    (control, ledger)
}

// ---------------------------------------------------------------------------
// Tick behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discharging_above_threshold_starts_one_batch() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(&scratch, vec![on_battery(50.0, 60.0)]);

    let outcome = control.tick().await.unwrap();
    let transition = outcome.transition.unwrap();
    assert_eq!(transition.to, InterlockState::Stressing);
    assert_eq!(transition.reason, TransitionReason::Discharging);
    assert_eq!(control.supervisor().live_count(), 2);

    // same conditions, no second batch
    let outcome = control.tick().await.unwrap();
    assert_eq!(outcome.transition, None);
    assert_eq!(ledger.borrow().spawned, 2);
}

#[tokio::test]
async fn low_battery_stops_batch() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(
        &scratch,
        vec![on_battery(50.0, 60.0), on_battery(3.0, 60.0)],
    );

    control.tick().await.unwrap();
    let outcome = control.tick().await.unwrap();

    assert_eq!(outcome.state, InterlockState::Idle);
    assert_eq!(
        outcome.transition.map(|t| t.reason),
        Some(TransitionReason::BatteryLow)
    );
    assert_eq!(control.supervisor().live_count(), 0);
    assert!(!control.supervisor().is_active());
    assert_eq!(ledger.borrow().killed, 2);
    assert!(ledger.borrow().alive.is_empty());
}

#[tokio::test]
async fn charger_connected_stops_batch() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(
        &scratch,
        vec![on_battery(80.0, 60.0), reading(Some(80.0), true, Some(60.0))],
    );

    control.tick().await.unwrap();
    let outcome = control.tick().await.unwrap();

    assert_eq!(outcome.state, InterlockState::Idle);
    assert!(ledger.borrow().alive.is_empty());
}

#[tokio::test]
async fn over_temperature_cools_down_then_resumes() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(
        &scratch,
        vec![
            on_battery(50.0, 60.0),
            on_battery(50.0, 95.0),
            on_battery(50.0, 88.0),
            on_battery(50.0, 84.0),
        ],
    );

    control.tick().await.unwrap();
    assert_eq!(control.state(), InterlockState::Stressing);

    let outcome = control.tick().await.unwrap();
    assert_eq!(outcome.state, InterlockState::CoolingDown);
    assert_eq!(control.supervisor().live_count(), 0);
    assert!(!control.supervisor().is_active());

    // still above the resume point
    let outcome = control.tick().await.unwrap();
    assert_eq!(outcome.transition, None);
    assert_eq!(outcome.state, InterlockState::CoolingDown);
    assert_eq!(control.supervisor().live_count(), 0);

    let outcome = control.tick().await.unwrap();
    assert_eq!(outcome.state, InterlockState::Stressing);
    assert_eq!(
        outcome.transition.map(|t| t.reason),
        Some(TransitionReason::Cooled)
    );
    assert_eq!(control.supervisor().live_count(), 2);
    assert_eq!(ledger.borrow().spawned, 4);
}

#[tokio::test]
async fn missing_battery_is_fatal_and_kills_workers() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(
        &scratch,
        vec![on_battery(50.0, 60.0), reading(None, false, Some(60.0))],
    );

    control.tick().await.unwrap();
    assert_eq!(control.supervisor().live_count(), 2);

    let err = control.tick().await.unwrap_err();
    assert!(matches!(
        err,
        DrainError::Interlock(InterlockError::BatteryUnavailable)
    ));
    assert_eq!(control.supervisor().live_count(), 0);
    assert!(ledger.borrow().alive.is_empty());
}

#[tokio::test]
async fn abnormal_worker_exit_is_reaped() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(&scratch, vec![on_battery(50.0, 60.0)]);

    control.tick().await.unwrap();
    ledger.borrow_mut().alive.remove(&1);

    control.tick().await.unwrap();
    assert_eq!(control.supervisor().live_count(), 1);
    assert!(control.supervisor().is_active());
    // no replacement batch while still stressing
    assert_eq!(ledger.borrow().spawned, 2);
}

#[tokio::test]
async fn history_records_every_tick() {
    let scratch = TempDir::new().unwrap();
    let (mut control, _ledger) = control_loop(
        &scratch,
        vec![on_battery(50.0, 60.0), reading(Some(49.0), false, None)],
    );

    control.tick().await.unwrap();
    control.tick().await.unwrap();

    let history = control.history();
    assert_eq!(history.snapshot(Metric::Battery), vec![50.0, 49.0]);
    // missing temperature stored as sentinel
    assert_eq!(history.snapshot(Metric::Temperature), vec![60.0, 0.0]);
    assert_eq!(history.range(Metric::Temperature), Some((60.0, 60.0)));
}

#[tokio::test]
async fn compact_output_written_per_tick() {
    let scratch = TempDir::new().unwrap();
    let (mut control, _ledger) = control_loop(&scratch, vec![on_battery(50.0, 60.0)]);

    control.tick().await.unwrap();
    control.tick().await.unwrap();

    let text = String::from_utf8(control.display().get_ref().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Elapsed"));
    assert!(lines[2].contains("50.0%"));
}

// ---------------------------------------------------------------------------
// Reconfiguration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn staged_config_waits_for_idle() {
    let scratch = TempDir::new().unwrap();
    let (mut control, _ledger) = control_loop(
        &scratch,
        vec![
            on_battery(50.0, 60.0),
            on_battery(50.0, 60.0),
            on_battery(3.0, 60.0),
            on_battery(50.0, 60.0),
        ],
    );

    control.tick().await.unwrap();

    let mut next = config(&scratch);
    next.min_battery_percent = 60;
    next.history_capacity = 5;
    control.stage_config(next);
    assert_eq!(control.config().min_battery_percent, 5);

    control.tick().await.unwrap();
    assert_eq!(control.config().min_battery_percent, 5);

    // battery low -> idle -> staged config applied
    control.tick().await.unwrap();
    assert_eq!(control.state(), InterlockState::Idle);
    assert_eq!(control.config().min_battery_percent, 60);
    assert_eq!(control.config().history_capacity, 60);

    // 50% is now below the new threshold
    let outcome = control.tick().await.unwrap();
    assert_eq!(outcome.state, InterlockState::Idle);
    assert_eq!(control.supervisor().live_count(), 0);
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_worker() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(&scratch, vec![on_battery(50.0, 60.0)]);
    let (_tx, rx) = mpsc::channel(1);

    let summary = control
        .run(tokio::time::sleep(Duration::from_secs(25)), rx)
        .await
        .unwrap();

    assert_eq!(summary.end, RunEnd::Interrupted);
    assert_eq!(summary.batches_started, 1);
    assert_eq!(control.supervisor().live_count(), 0);
    assert!(!control.supervisor().is_active());
    assert_eq!(ledger.borrow().spawned, 2);
    assert!(ledger.borrow().alive.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_sampling_still_stops_workers() {
    let scratch = TempDir::new().unwrap();
    let mut sensors = ScriptedSensors::new(vec![on_battery(50.0, 60.0)]);
    sensors.stall_on = Some(2);
    let taken = Rc::clone(&sensors.taken);
    let spawner = FakeSpawner::default();
    let ledger = Rc::clone(&spawner.ledger);
    let mut control = ControlLoop::new(config(&scratch), sensors, spawner, Vec::new());
    let (_tx, rx) = mpsc::channel(1);

    // second sample starts at 10s and is still pending at 15s
    let summary = control
        .run(tokio::time::sleep(Duration::from_secs(15)), rx)
        .await
        .unwrap();

    assert_eq!(taken.get(), 2);
    assert_eq!(summary.end, RunEnd::Interrupted);
    assert_eq!(summary.elapsed, Duration::from_secs(15));
    assert_eq!(ledger.borrow().spawned, 2);
    assert!(ledger.borrow().alive.is_empty());
    assert_eq!(control.supervisor().live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_limit_ends_run_and_reports() {
    let scratch = TempDir::new().unwrap();
    let mut config = config(&scratch);
    config.duration_minutes = Some(1);
    let spawner = FakeSpawner::default();
    let ledger = Rc::clone(&spawner.ledger);
    let sensors = ScriptedSensors::new(vec![on_battery(50.0, 60.0)]);
    let mut control = ControlLoop::new(config, sensors, spawner, Vec::new());
    let (_tx, rx) = mpsc::channel(1);

    let summary = control
        .run(std::future::pending::<()>(), rx)
        .await
        .unwrap();

    assert_eq!(summary.end, RunEnd::Completed);
    assert_eq!(summary.elapsed, Duration::from_secs(60));
    assert_eq!(summary.batches_started, 1);
    assert!(ledger.borrow().alive.is_empty());

    let output = String::from_utf8(control.display().get_ref().clone()).unwrap();
    assert!(output.ends_with("Run completed after 00:01:00, 1 batch(es) started\n"));
}

#[tokio::test(start_paused = true)]
async fn run_ticks_at_check_interval() {
    let scratch = TempDir::new().unwrap();
    let sensors = ScriptedSensors::new(vec![reading(Some(90.0), true, Some(50.0))]);
    let taken = Rc::clone(&sensors.taken);
    let mut control = ControlLoop::new(config(&scratch), sensors, FakeSpawner::default(), Vec::new());
    let (_tx, rx) = mpsc::channel(1);

    control
        .run(tokio::time::sleep(Duration::from_secs(25)), rx)
        .await
        .unwrap();

    // ticks at 0s, 10s and 20s
    assert_eq!(taken.get(), 3);
    assert_eq!(control.state(), InterlockState::Idle);
}

#[tokio::test(start_paused = true)]
async fn run_ends_with_error_when_battery_disappears() {
    let scratch = TempDir::new().unwrap();
    let (mut control, ledger) = control_loop(
        &scratch,
        vec![on_battery(50.0, 60.0), reading(None, false, None)],
    );
    let (_tx, rx) = mpsc::channel(1);

    let result = control.run(std::future::pending::<()>(), rx).await;

    assert!(matches!(result, Err(DrainError::Interlock(_))));
    assert_eq!(control.supervisor().live_count(), 0);
    assert!(ledger.borrow().alive.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reload_during_run_applies_while_idle() {
    let scratch = TempDir::new().unwrap();
    let (mut control, _ledger) =
        control_loop(&scratch, vec![reading(Some(90.0), true, Some(50.0))]);
    let (tx, rx) = mpsc::channel(1);

    let mut next = config(&scratch);
    next.min_battery_percent = 30;
    next.check_interval_seconds = 4;
    tx.send(next).await.unwrap();

    control
        .run(tokio::time::sleep(Duration::from_secs(15)), rx)
        .await
        .unwrap();

    assert_eq!(control.config().min_battery_percent, 30);
    assert_eq!(control.config().effective_check_interval(), 4);
}
