//! Render sink
//!
//! Dashboard mode clears the terminal and redraws an 80-column status page
//! every tick. Compact mode appends one line per tick under a header that is
//! printed once. Write failures are logged and never abort the tick.

use crossterm::{
    cursor::MoveTo,
    queue,
    terminal::{Clear, ClearType},
};
use drain_common::{graph, DisplayMode, HistoryStore, Metric, MetricSample, WorkerRole};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;
use tracing::warn;

use crate::control::RunSummary;
use crate::interlock::InterlockState;

pub const WIDTH: usize = 80;
const TITLE: &str = "BATTERY DRAIN STRESS SUPERVISOR";
const UNAVAILABLE: &str = "N/A";
const CORES_PER_ROW: usize = 4;

/// Everything one frame shows
pub struct StatusView<'a> {
    pub sample: &'a MetricSample,
    pub history: &'a HistoryStore,
    pub state: InterlockState,
    pub workers: &'a BTreeMap<WorkerRole, usize>,
    pub elapsed: Duration,
}

pub struct Display<W: Write> {
    out: W,
    mode: DisplayMode,
    graph_height: usize,
    header_written: bool,
}

impl<W: Write> Display<W> {
    pub fn new(out: W, mode: DisplayMode, graph_height: usize) -> Self {
        Self {
            out,
            mode,
            graph_height,
            header_written: false,
        }
    }

    pub fn set_layout(&mut self, mode: DisplayMode, graph_height: usize) {
        if mode != self.mode {
            self.header_written = false;
        }
        self.mode = mode;
        self.graph_height = graph_height;
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn render(&mut self, view: &StatusView<'_>) {
        if let Err(e) = self.try_render(view) {
            warn!("Failed to render status: {}", e);
        }
    }

    fn try_render(&mut self, view: &StatusView<'_>) -> io::Result<()> {
        match self.mode {
            DisplayMode::Dashboard => {
                queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
                self.out
                    .write_all(dashboard_text(view, self.graph_height).as_bytes())?;
            }
            DisplayMode::Compact => {
                if !self.header_written {
                    writeln!(self.out, "{}", compact_header())?;
                    self.header_written = true;
                }
                writeln!(self.out, "{}", compact_line(view))?;
            }
        }
        self.out.flush()
    }

    /// Final line after the workers are gone
    pub fn summary(&mut self, summary: &RunSummary) {
        let result = writeln!(self.out, "\n{}", summary_line(summary))
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Failed to write run summary: {}", e);
        }
    }
}

/// e.g. `Run interrupted after 00:12:40, 3 batch(es) started`
pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "Run {} after {}, {} batch(es) started",
        summary.end.as_str(),
        format_elapsed(summary.elapsed.as_secs()),
        summary.batches_started
    )
}

/// `HH:MM:SS`, hours keep growing past 99
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Battery time estimate, e.g. `2h 05m`
pub fn format_remaining(secs: u64) -> String {
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

fn or_unavailable(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn battery_summary(sample: &MetricSample) -> (String, String) {
    let Some(battery) = sample.battery else {
        return (UNAVAILABLE.to_string(), UNAVAILABLE.to_string());
    };

    let status = if battery.is_charging() {
        "Charging"
    } else {
        "Discharging"
    };
    let remaining = if battery.is_charging() {
        "Charging".to_string()
    } else {
        battery
            .seconds_remaining
            .map(format_remaining)
            .unwrap_or_else(|| "Calculating...".to_string())
    };

    (format!("{:.1}% ({})", battery.percent, status), remaining)
}

fn power_summary(sample: &MetricSample) -> Option<String> {
    let thermal = &sample.thermal;
    match (thermal.cpu_power_watts, thermal.gpu_power_watts) {
        (None, None) => None,
        (cpu, gpu) => Some(format!(
            "CPU {} | GPU {}",
            or_unavailable(cpu.map(|w| format!("{:.2} W", w))),
            or_unavailable(gpu.map(|w| format!("{:.2} W", w)))
        )),
    }
}

fn history_range(history: &HistoryStore, metric: Metric) -> String {
    match history.range(metric) {
        Some((min, max)) => format!("{:.1}{unit} - {:.1}{unit}", min, max, unit = metric.unit()),
        None => UNAVAILABLE.to_string(),
    }
}

fn workers_summary(workers: &BTreeMap<WorkerRole, usize>) -> String {
    if workers.is_empty() {
        return "none".to_string();
    }
    workers
        .iter()
        .map(|(role, count)| format!("{} x{}", role, count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full dashboard page, at most `WIDTH` columns per line
pub fn dashboard_text(view: &StatusView<'_>, graph_height: usize) -> String {
    let sample = view.sample;
    let rule = "=".repeat(WIDTH);
    let thin = "-".repeat(WIDTH);
    let (battery, remaining) = battery_summary(sample);

    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "{:^width$}", TITLE, width = WIDTH);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Elapsed: {}    State: {}",
        format_elapsed(view.elapsed.as_secs()),
        view.state
    );
    let _ = writeln!(out, "Battery: {}", battery);
    let _ = writeln!(out, "Time remaining: {}", remaining);
    let _ = writeln!(
        out,
        "CPU Temperature: {}",
        or_unavailable(sample.temperature().map(|t| format!("{:.1}°C", t)))
    );
    let _ = writeln!(
        out,
        "Fan: {}",
        or_unavailable(sample.thermal.fan_rpm.map(|rpm| format!("{} RPM", rpm)))
    );
    let _ = writeln!(out, "Power: {}", or_unavailable(power_summary(sample)));
    let _ = writeln!(out, "{}", thin);

    let _ = writeln!(out, "CPU cores: {}", sample.core_loads.len());
    for (row, chunk) in sample.core_loads.chunks(CORES_PER_ROW).enumerate() {
        let cells: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(i, load)| format!("Core {:>2}: {:>5.1}%", row * CORES_PER_ROW + i, load))
            .collect();
        let _ = writeln!(out, "  {}", cells.join("   "));
    }
    let _ = writeln!(out, "Average CPU: {:.1}%", sample.average_load());
    let _ = writeln!(out, "Memory: {:.1}%", sample.memory_percent);
    let _ = writeln!(
        out,
        "Disk: {}",
        or_unavailable(sample.disk_percent.map(|d| format!("{:.1}%", d)))
    );
    let _ = writeln!(
        out,
        "Swap: {}",
        or_unavailable(sample.swap_percent.map(|s| format!("{:.1}%", s)))
    );

    for metric in Metric::ALL {
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(
            out,
            "{}  [range {}]",
            metric.title(),
            history_range(view.history, metric)
        );
        let _ = writeln!(
            out,
            "{}",
            graph::render(&view.history.snapshot(metric), graph_height)
        );
    }

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Workers: {}", workers_summary(view.workers));
    let _ = writeln!(out, "Press Ctrl+C to stop");
    out
}

pub fn compact_header() -> String {
    format!(
        "{:<8} | {:>6} | {:>7} | {:>6} | {:>7} | {:>8} | {:>8} | {:>6}",
        "Elapsed", "CPU", "Temp", "Mem", "Battery", "Fan", "Power", "Disk"
    )
}

/// One line per tick: `elapsed | cpu | temp | mem | battery | fan | power | disk`
pub fn compact_line(view: &StatusView<'_>) -> String {
    let sample = view.sample;
    let power = match (sample.thermal.cpu_power_watts, sample.thermal.gpu_power_watts) {
        (None, None) => None,
        (cpu, gpu) => Some(cpu.unwrap_or(0.0) + gpu.unwrap_or(0.0)),
    };

    format!(
        "{:<8} | {:>5.1}% | {:>7} | {:>5.1}% | {:>7} | {:>8} | {:>8} | {:>6}",
        format_elapsed(view.elapsed.as_secs()),
        sample.average_load(),
        or_unavailable(sample.temperature().map(|t| format!("{:.1}°C", t))),
        sample.memory_percent,
        or_unavailable(sample.battery_percent().map(|b| format!("{:.1}%", b))),
        or_unavailable(sample.thermal.fan_rpm.map(|rpm| format!("{}rpm", rpm))),
        or_unavailable(power.map(|w| format!("{:.2}W", w))),
        or_unavailable(sample.disk_percent.map(|d| format!("{:.1}%", d))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RunEnd;
    use chrono::Utc;
    use drain_common::{BatteryReading, ThermalReading};

    fn sample() -> MetricSample {
        MetricSample {
            timestamp: Utc::now(),
            core_loads: vec![99.0, 98.5, 97.0, 96.0, 95.5, 94.0],
            memory_percent: 41.2,
            swap_percent: Some(3.0),
            battery: Some(BatteryReading {
                percent: 52.0,
                charging: Some(false),
                seconds_remaining: Some(8100),
            }),
            thermal: ThermalReading {
                temperature_celsius: Some(61.2),
                fan_rpm: Some(2210),
                cpu_power_watts: Some(4.5),
                gpu_power_watts: None,
            },
            disk_percent: Some(63.0),
        }
    }

    fn history_with(sample: &MetricSample) -> HistoryStore {
        let mut history = HistoryStore::new(60);
        history.record(sample);
        let mut hotter = sample.clone();
        hotter.thermal.temperature_celsius = Some(70.0);
        history.record(&hotter);
        history
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(3725), "01:02:05");
        assert_eq!(format_elapsed(360_000), "100:00:00");
    }

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            end: RunEnd::Completed,
            elapsed: Duration::from_secs(1805),
            batches_started: 2,
        };
        assert_eq!(
            summary_line(&summary),
            "Run completed after 00:30:05, 2 batch(es) started"
        );

        let mut display = Display::new(BrokenPipe, DisplayMode::Compact, 5);
        display.summary(&summary);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(8100), "2h 15m");
        assert_eq!(format_remaining(300), "0h 05m");
    }

    #[test]
    fn test_dashboard_contents() {
        let sample = sample();
        let history = history_with(&sample);
        let workers: BTreeMap<_, _> = [(WorkerRole::Cpu, 6)].into_iter().collect();
        let view = StatusView {
            sample: &sample,
            history: &history,
            state: InterlockState::Stressing,
            workers: &workers,
            elapsed: Duration::from_secs(65),
        };

        let text = dashboard_text(&view, 5);
        assert!(text.contains(TITLE));
        assert!(text.contains("Battery: 52.0% (Discharging)"));
        assert!(text.contains("Time remaining: 2h 15m"));
        assert!(text.contains("CPU Temperature: 61.2°C"));
        assert!(text.contains("Fan: 2210 RPM"));
        assert!(text.contains("Power: CPU 4.50 W | GPU N/A"));
        assert!(text.contains("Core  5:  94.0%"));
        assert!(text.contains("range 61.2°C - 70.0°C"));
        assert!(text.contains("State: stressing"));
        assert!(text.contains("Elapsed: 00:01:05"));
        assert!(text.contains("Workers: cpu x6"));
        assert!(text.contains("Press Ctrl+C to stop"));

        for line in text.lines() {
            assert!(line.chars().count() <= WIDTH, "too wide: {:?}", line);
        }
    }

    #[test]
    fn test_dashboard_with_missing_readings() {
        let mut sample = sample();
        sample.battery = None;
        sample.thermal = ThermalReading::default();
        sample.disk_percent = None;
        let history = HistoryStore::new(60);
        let workers = BTreeMap::new();
        let view = StatusView {
            sample: &sample,
            history: &history,
            state: InterlockState::Idle,
            workers: &workers,
            elapsed: Duration::ZERO,
        };

        let text = dashboard_text(&view, 5);
        assert!(text.contains("Battery: N/A"));
        assert!(text.contains("CPU Temperature: N/A"));
        assert!(text.contains("Power: N/A"));
        assert!(text.contains(graph::NO_DATA));
        assert!(text.contains("Workers: none"));
    }

    #[test]
    fn test_charging_remaining_label() {
        let mut sample = sample();
        sample.battery = Some(BatteryReading {
            percent: 80.0,
            charging: Some(true),
            seconds_remaining: None,
        });
        let (battery, remaining) = battery_summary(&sample);
        assert_eq!(battery, "80.0% (Charging)");
        assert_eq!(remaining, "Charging");
    }

    #[test]
    fn test_compact_header_written_once() {
        let sample = sample();
        let history = history_with(&sample);
        let workers = BTreeMap::new();
        let view = StatusView {
            sample: &sample,
            history: &history,
            state: InterlockState::Stressing,
            workers: &workers,
            elapsed: Duration::from_secs(10),
        };

        let mut display = Display::new(Vec::new(), DisplayMode::Compact, 10);
        display.render(&view);
        display.render(&view);

        let text = String::from_utf8(display.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Elapsed"));
        assert!(lines[1].starts_with("00:00:10"));
        assert!(lines[1].contains("61.2°C"));
        assert!(lines[1].contains("2210rpm"));
        assert!(lines[1].contains("4.50W"));
    }

    #[test]
    fn test_dashboard_clears_screen() {
        let sample = sample();
        let history = history_with(&sample);
        let workers = BTreeMap::new();
        let view = StatusView {
            sample: &sample,
            history: &history,
            state: InterlockState::Idle,
            workers: &workers,
            elapsed: Duration::ZERO,
        };

        let mut display = Display::new(Vec::new(), DisplayMode::Dashboard, 5);
        display.render(&view);

        let text = String::from_utf8(display.get_ref().clone()).unwrap();
        assert!(text.starts_with('\u{1b}'));
        assert!(text.contains(TITLE));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let sample = sample();
        let history = HistoryStore::new(60);
        let workers = BTreeMap::new();
        let view = StatusView {
            sample: &sample,
            history: &history,
            state: InterlockState::Idle,
            workers: &workers,
            elapsed: Duration::ZERO,
        };

        let mut display = Display::new(BrokenPipe, DisplayMode::Compact, 5);
        display.render(&view);
    }
}
