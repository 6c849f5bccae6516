//! Bounded metric history
//!
//! One fixed-capacity ring buffer per metric stream. Absent readings are
//! stored as a `0.0` sentinel so every series stays aligned tick for tick;
//! sentinels are plotted but excluded from `range`.

use std::collections::VecDeque;

use crate::sample::MetricSample;

/// Value stored when a reading was unavailable
pub const SENTINEL: f64 = 0.0;

/// Metric streams kept in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Temperature,
    Cpu,
    Battery,
    Memory,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Temperature,
        Metric::Cpu,
        Metric::Battery,
        Metric::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Cpu => "cpu",
            Metric::Battery => "battery",
            Metric::Memory => "memory",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Metric::Temperature => "CPU Temperature (°C)",
            Metric::Cpu => "Average CPU Usage (%)",
            Metric::Battery => "Battery Level (%)",
            Metric::Memory => "Memory Usage (%)",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            _ => "%",
        }
    }

    fn index(&self) -> usize {
        match self {
            Metric::Temperature => 0,
            Metric::Cpu => 1,
            Metric::Battery => 2,
            Metric::Memory => 3,
        }
    }
}

/// A FIFO ring buffer of scalar values with fixed capacity
#[derive(Debug, Clone)]
pub struct HistorySeries {
    values: VecDeque<f64>,
    capacity: usize,
}

impl HistorySeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest value when full
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Values oldest first
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// (min, max) over real readings; `None` if there are none
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| *v != SENTINEL && v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// All history series for a run
#[derive(Debug, Clone)]
pub struct HistoryStore {
    series: [HistorySeries; 4],
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: std::array::from_fn(|_| HistorySeries::new(capacity)),
        }
    }

    pub fn push(&mut self, metric: Metric, value: f64) {
        self.series[metric.index()].push(value);
    }

    pub fn snapshot(&self, metric: Metric) -> Vec<f64> {
        self.series(metric).snapshot()
    }

    pub fn range(&self, metric: Metric) -> Option<(f64, f64)> {
        self.series(metric).range()
    }

    pub fn series(&self, metric: Metric) -> &HistorySeries {
        &self.series[metric.index()]
    }

    pub fn capacity(&self) -> usize {
        self.series[0].capacity()
    }

    /// Push one value per series from a sample, sentinel for absent readings
    pub fn record(&mut self, sample: &MetricSample) {
        let or_sentinel = |v: Option<f32>| v.map(f64::from).unwrap_or(SENTINEL);

        self.push(Metric::Temperature, or_sentinel(sample.temperature()));
        self.push(Metric::Cpu, f64::from(sample.average_load()));
        self.push(Metric::Battery, or_sentinel(sample.battery_percent()));
        self.push(Metric::Memory, f64::from(sample.memory_percent));
    }
}
