//! Operation latency collector
//!
//! Wraps named operations, timing each call and noting whether it failed.
//! Only the most recent samples of each operation are kept, so memory use
//! stays flat no matter how long the process runs; statistics describe that
//! rolling window.

use crate::core::config::DEFAULT_SAMPLE_WINDOW;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// One timed call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSample {
    pub duration: Duration,
    pub ok: bool,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_nanos() as f64 / 1_000_000.0)
}

/// Aggregate over an operation's retained samples
///
/// Serializes with camelCase keys and durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    #[serde(serialize_with = "as_millis")]
    pub average_duration: Duration,
    #[serde(serialize_with = "as_millis")]
    pub min_duration: Duration,
    #[serde(serialize_with = "as_millis")]
    pub max_duration: Duration,
    #[serde(serialize_with = "as_millis")]
    pub total_duration: Duration,
    /// Failed share of the window, 0.0 to 1.0
    pub error_rate: f64,
}

impl OperationStats {
    fn from_samples<'a>(samples: impl IntoIterator<Item = &'a OperationSample>) -> Option<Self> {
        let mut count = 0u64;
        let mut errors = 0u64;
        let mut total = Duration::ZERO;
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;

        for sample in samples {
            count += 1;
            if !sample.ok {
                errors += 1;
            }
            total = total.saturating_add(sample.duration);
            min = min.min(sample.duration);
            max = max.max(sample.duration);
        }

        if count == 0 {
            return None;
        }

        Some(Self {
            count,
            errors,
            average_duration: average(total, count),
            min_duration: min,
            max_duration: max,
            total_duration: total,
            error_rate: errors as f64 / count as f64,
        })
    }
}

// Divides by the full u64 count
fn average(total: Duration, count: u64) -> Duration {
    let nanos = total.as_nanos() / u128::from(count);
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

/// Rolling-window latency collector
///
/// # Example
///
/// ```
/// use log_pipeline::MetricsCollector;
///
/// let collector = MetricsCollector::new();
///
/// let parsed: Result<u32, std::num::ParseIntError> = collector.measure("parse", || "42".parse());
/// assert_eq!(parsed, Ok(42));
///
/// let failed: Result<u32, _> = collector.measure("parse", || "forty-two".parse::<u32>());
/// assert!(failed.is_err());
///
/// let stats = collector.get_stats("parse").unwrap();
/// assert_eq!(stats.count, 2);
/// assert_eq!(stats.errors, 1);
/// assert_eq!(stats.error_rate, 0.5);
/// ```
#[derive(Debug)]
pub struct MetricsCollector {
    window: usize,
    operations: Mutex<HashMap<String, VecDeque<OperationSample>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    /// Create a collector retaining `window` samples per operation
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            operations: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Run `f`, recording its duration and whether it returned `Err`
    ///
    /// The result is returned untouched. A panic inside `f` is recorded as
    /// a failure and then resumed, so callers observe exactly what `f` did.
    pub fn measure<T, E, F>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let start = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => {
                self.record(operation, start.elapsed(), result.is_ok());
                result
            }
            Err(payload) => {
                self.record(operation, start.elapsed(), false);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Like [`measure`](Self::measure) for closures that cannot fail
    /// other than by panicking
    pub fn measure_value<T, F>(&self, operation: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let result: Result<T, std::convert::Infallible> = self.measure(operation, || Ok(f()));
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Record an externally timed call
    pub fn record(&self, operation: &str, duration: Duration, ok: bool) {
        let sample = OperationSample { duration, ok };
        let mut operations = self.operations.lock();

        if let Some(ring) = operations.get_mut(operation) {
            if ring.len() >= self.window {
                ring.pop_front();
            }
            ring.push_back(sample);
            return;
        }

        let mut ring = VecDeque::with_capacity(self.window.min(DEFAULT_SAMPLE_WINDOW));
        ring.push_back(sample);
        operations.insert(operation.to_string(), ring);
    }

    pub fn get_stats(&self, operation: &str) -> Option<OperationStats> {
        let operations = self.operations.lock();
        operations
            .get(operation)
            .and_then(|ring| OperationStats::from_samples(ring.iter()))
    }

    pub fn all_stats(&self) -> BTreeMap<String, OperationStats> {
        let operations = self.operations.lock();
        operations
            .iter()
            .filter_map(|(name, ring)| {
                OperationStats::from_samples(ring.iter()).map(|stats| (name.clone(), stats))
            })
            .collect()
    }

    /// Retained samples of one operation, oldest first
    pub fn samples(&self, operation: &str) -> Vec<OperationSample> {
        let operations = self.operations.lock();
        operations
            .get(operation)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.operations.lock().clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
