//! Trend classification over bounded metric series.
//!
//! A series keeps its last `capacity` samples. Classification compares the
//! mean of the newest [`WINDOW`] samples with the mean of the [`WINDOW`]
//! before them: a rise of more than 10% is a trend, anything else is
//! stable. Whether a rise is good news depends on the metric, so each
//! series carries a [`Direction`].
//!
//! The analyzer only labels series. Adapting thresholds or eviction
//! fractions from the labels is left to the consumer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

/// Fewer samples than this classify as [`Trend::InsufficientData`].
pub const MIN_SAMPLES: usize = 2 * WINDOW;

/// Samples in each compared window.
pub const WINDOW: usize = 10;

/// Recent mean must exceed prior mean by this factor to count as a rise.
pub const RISE_FACTOR: f64 = 1.1;

/// Interval cache hit rate, sampled by the router's maintenance task.
pub const CACHE_HIT_RATE: &str = "cache_hit_rate";

/// Generation latency reported through `record_outcome`, in milliseconds.
pub const GENERATION_LATENCY_MS: &str = "generation_latency_ms";

/// Which way a metric should move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// Classification of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Bounded sample history of one metric.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    direction: Direction,
    capacity: usize,
    samples: VecDeque<f64>,
}

impl MetricSeries {
    pub fn new(direction: Direction, capacity: usize) -> Self {
        Self {
            direction,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Append a sample, dropping the oldest when full. Non-finite samples
    /// are ignored.
    pub fn push(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn classify(&self) -> Trend {
        let n = self.samples.len();
        if n < MIN_SAMPLES {
            return Trend::InsufficientData;
        }
        let recent = mean(self.samples.range(n - WINDOW..));
        let prior = mean(self.samples.range(n - 2 * WINDOW..n - WINDOW));
        if recent > prior * RISE_FACTOR {
            match self.direction {
                Direction::HigherIsBetter => Trend::Improving,
                Direction::LowerIsBetter => Trend::Declining,
            }
        } else {
            Trend::Stable
        }
    }
}

fn mean<'a>(samples: impl ExactSizeIterator<Item = &'a f64>) -> f64 {
    let n = samples.len();
    samples.sum::<f64>() / n as f64
}

/// One row of [`TrendAnalyzer::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReading {
    pub name: String,
    pub direction: Direction,
    pub trend: Trend,
    pub samples: usize,
    pub latest: Option<f64>,
}

/// Process-wide set of named metric series.
#[derive(Debug)]
pub struct TrendAnalyzer {
    capacity: usize,
    series: Mutex<HashMap<String, MetricSeries>>,
}

impl TrendAnalyzer {
    /// Create an analyzer whose series each keep `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Create an analyzer with the router's built-in series registered.
    pub fn with_builtin_series(capacity: usize) -> Self {
        let analyzer = Self::new(capacity);
        analyzer.register(CACHE_HIT_RATE, Direction::HigherIsBetter);
        analyzer.register(GENERATION_LATENCY_MS, Direction::LowerIsBetter);
        analyzer
    }

    /// Register a series. Returns `false` if the name was already taken;
    /// the existing series is kept.
    pub fn register(&self, name: &str, direction: Direction) -> bool {
        let Ok(mut series) = self.series.lock() else {
            return false;
        };
        if series.contains_key(name) {
            return false;
        }
        series.insert(name.to_string(), MetricSeries::new(direction, self.capacity));
        true
    }

    /// Append a sample. Samples for unregistered series are dropped.
    pub fn record(&self, name: &str, sample: f64) {
        let Ok(mut series) = self.series.lock() else {
            warn!(series = name, "trend lock poisoned, sample dropped");
            return;
        };
        match series.get_mut(name) {
            Some(s) => s.push(sample),
            None => warn!(series = name, "sample for unregistered series dropped"),
        }
    }

    /// Classify one series; `None` if it is not registered.
    pub fn classify(&self, name: &str) -> Option<Trend> {
        self.series.lock().ok()?.get(name).map(MetricSeries::classify)
    }

    /// Copy of one series.
    pub fn series(&self, name: &str) -> Option<MetricSeries> {
        self.series.lock().ok()?.get(name).cloned()
    }

    /// Classification of every series, sorted by name.
    pub fn snapshot(&self) -> Vec<TrendReading> {
        let Ok(series) = self.series.lock() else {
            return Vec::new();
        };
        let mut readings: Vec<TrendReading> = series
            .iter()
            .map(|(name, s)| TrendReading {
                name: name.clone(),
                direction: s.direction(),
                trend: s.classify(),
                samples: s.len(),
                latest: s.latest(),
            })
            .collect();
        readings.sort_by(|a, b| a.name.cmp(&b.name));
        readings
    }
}
