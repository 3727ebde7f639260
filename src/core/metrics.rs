//! Ingestion queue counters
//!
//! Lock-free counters describing queue health: how many records came in,
//! how many were shed by the overflow policy, and how delivery went.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the ingestion queue
///
/// # Example
///
/// ```
/// use log_pipeline::QueueMetrics;
///
/// let metrics = QueueMetrics::new();
///
/// metrics.record_enqueued();
/// metrics.record_evicted();
///
/// assert_eq!(metrics.enqueued_count(), 1);
/// assert_eq!(metrics.dropped_count(), 1);
/// ```
#[derive(Debug)]
pub struct QueueMetrics {
    /// Records admitted into the queue
    enqueued: AtomicU64,

    /// Oldest records evicted to admit newer ones
    evicted: AtomicU64,

    /// New records turned away by `RejectNewest`
    rejected: AtomicU64,

    /// Records taken off the queue and handed to sinks
    dispatched: AtomicU64,

    /// Individual sink invocations that failed or panicked
    sink_failures: AtomicU64,
}

impl QueueMetrics {
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Records lost to overflow, whichever policy shed them
    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.evicted_count() + self.rejected_count()
    }

    #[inline]
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failure_count(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Record an admitted record; returns the previous count
    #[inline]
    pub fn record_enqueued(&self) -> u64 {
        self.enqueued.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_evicted(&self) -> u64 {
        self.evicted.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_rejected(&self) -> u64 {
        self.rejected.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_dispatched(&self) -> u64 {
        self.dispatched.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_sink_failure(&self) -> u64 {
        self.sink_failures.fetch_add(1, Ordering::Relaxed)
    }

    /// Get drop rate as a percentage (0.0 - 100.0)
    ///
    /// Rejected records never made it in, so they count against the
    /// offered total alongside admitted ones.
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.dropped_count() as f64;
        let offered = (self.enqueued_count() + self.rejected_count()) as f64;
        if offered == 0.0 {
            0.0
        } else {
            (dropped / offered) * 100.0
        }
    }

    pub fn reset(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.evicted.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.sink_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for QueueMetrics {
    /// Create a snapshot of the current metrics values
    fn clone(&self) -> Self {
        Self {
            enqueued: AtomicU64::new(self.enqueued_count()),
            evicted: AtomicU64::new(self.evicted_count()),
            rejected: AtomicU64::new(self.rejected_count()),
            dispatched: AtomicU64::new(self.dispatched_count()),
            sink_failures: AtomicU64::new(self.sink_failure_count()),
        }
    }
}
