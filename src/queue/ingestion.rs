//! Bounded ingestion queue with a lazily started drain thread
//!
//! Producers never block: when the queue is full the overflow policy either
//! evicts the oldest waiting record or turns the new one away. A drain
//! thread is started on demand, wakes every drain interval (or on flush),
//! hands records to every sink in rounds of at most `drain_batch_size`, and
//! exits once it finds the queue empty.
//!
//! Records from one producer reach each sink in the order that producer
//! enqueued them. No order is promised across producers.

use crate::compression::CompressionBatcher;
use crate::core::error::panic_message;
use crate::core::{
    config::QueueConfig, deliver, Dispatch, FormatRequest, LogRecord, OverflowCallback,
    OverflowPolicy, PipelineError, QueueMetrics, Result, Sink,
};
use crate::perf::MetricsCollector;
use crate::pool::ObjectPools;
use crate::worker::{Task, TaskKind, WorkerPool};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// What happened to a record handed to [`IngestionQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued with room to spare
    Accepted,
    /// Queued after evicting the oldest waiting record
    Evicted {
        /// Queue sequence number of the evicted record
        sequence: u64,
    },
    /// Discarded because the queue was full
    Rejected,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }
}

/// Components the queue hands drained records to
pub struct QueueCollaborators {
    pub collector: Arc<MetricsCollector>,
    /// Pre-formatting runs here when configured
    pub workers: Option<Arc<WorkerPool>>,
    /// Receives every dispatched record
    pub batcher: Option<Arc<CompressionBatcher>>,
    /// Takes dispatched records, with their contexts and events, back
    /// when there is no batcher
    pub recycle: Option<ObjectPools>,
    pub on_overflow: Option<OverflowCallback>,
}

impl QueueCollaborators {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            workers: None,
            batcher: None,
            recycle: None,
            on_overflow: None,
        }
    }
}

impl Default for QueueCollaborators {
    fn default() -> Self {
        Self::new(Arc::new(MetricsCollector::new()))
    }
}

struct QueueSlot {
    sequence: u64,
    record: LogRecord,
}

struct QueueState {
    slots: VecDeque<QueueSlot>,
    next_sequence: u64,
    consumer_active: bool,
}

struct QueueShared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    // Held while a round is taken off the queue and dispatched
    dispatch_lock: Mutex<()>,
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
    metrics: QueueMetrics,
    collector: Arc<MetricsCollector>,
    workers: Option<Arc<WorkerPool>>,
    batcher: Option<Arc<CompressionBatcher>>,
    recycle: Option<ObjectPools>,
    on_overflow: Option<OverflowCallback>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    shutdown: AtomicBool,
}

impl QueueShared {
    fn consume(&self) {
        loop {
            match self.wake_rx.recv_timeout(self.config.drain_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            while self.drain_round(None) > 0 {
                thread::yield_now();
            }

            let mut state = self.state.lock();
            if state.slots.is_empty() {
                state.consumer_active = false;
                return;
            }
        }
        self.state.lock().consumer_active = false;
    }

    /// Take up to `drain_batch_size` slots and dispatch them
    ///
    /// With `before`, only slots older than that sequence number are taken.
    fn drain_round(&self, before: Option<u64>) -> usize {
        let _dispatching = self.dispatch_lock.lock();

        let round: Vec<QueueSlot> = {
            let mut state = self.state.lock();
            let eligible = match before {
                Some(limit) => state
                    .slots
                    .iter()
                    .take_while(|slot| slot.sequence < limit)
                    .count(),
                None => state.slots.len(),
            };
            let take = eligible.min(self.config.drain_batch_size);
            state.slots.drain(..take).collect()
        };

        let count = round.len();
        for slot in round {
            self.dispatch(slot.record);
        }
        count
    }

    fn dispatch(&self, record: LogRecord) {
        let formatted = self.preformat(&record);
        let dispatch = Dispatch {
            record: &record,
            formatted: formatted.as_deref(),
        };

        for sink in self.sinks.read().iter() {
            let name = sink.name();
            let operation = format!("sink.{}", name);
            let result = self.collector.measure(&operation, || {
                panic::catch_unwind(AssertUnwindSafe(|| deliver(sink.as_ref(), &dispatch)))
                    .unwrap_or_else(|payload| {
                        Err(PipelineError::SinkPanicked {
                            sink: name.to_string(),
                            message: panic_message(payload.as_ref()),
                        })
                    })
            });

            if let Err(e) = result {
                self.metrics.record_sink_failure();
                tracing::warn!(sink = name, error = %e, "sink failed, other sinks unaffected");
            }
        }
        self.metrics.record_dispatched();

        match (&self.batcher, &self.recycle) {
            (Some(batcher), _) => {
                batcher.add_record(record);
            }
            (None, Some(pools)) => pools.recycle_record(record),
            (None, None) => {}
        }
    }

    fn preformat(&self, record: &LogRecord) -> Option<String> {
        let format = self.config.preformat?;
        let request = FormatRequest::from_record(record);

        let Some(workers) = &self.workers else {
            return Some(format.format(&request));
        };

        match workers
            .submit(Task::FormatRecord { request, format })
            .and_then(|output| output.into_text(TaskKind::FormatRecord))
        {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::debug!(error = %e, "formatting inline");
                Some(format.format_record(record))
            }
        }
    }

    fn flush_sinks(&self) {
        for sink in self.sinks.read().iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| sink.flush()))
                .unwrap_or_else(|payload| {
                    Err(PipelineError::SinkPanicked {
                        sink: sink.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                });
            if let Err(e) = result {
                tracing::warn!(sink = sink.name(), error = %e, "sink flush failed");
            }
        }
    }

    fn overflow_alert(&self, policy: OverflowPolicy) {
        let dropped = self.metrics.dropped_count();
        if dropped != 1 && dropped % 1000 != 0 {
            return;
        }

        tracing::warn!(
            dropped,
            capacity = self.config.capacity,
            %policy,
            "ingestion queue full, records dropped; consider a larger capacity"
        );
        if let Some(callback) = &self.on_overflow {
            callback(dropped);
        }
    }
}

/// Multi-producer ingestion queue
///
/// # Example
///
/// ```
/// use log_pipeline::core::{LogLevel, LogRecord, QueueConfig};
/// use log_pipeline::queue::{EnqueueOutcome, IngestionQueue, QueueCollaborators};
///
/// let config = QueueConfig { capacity: 2, ..QueueConfig::default() };
/// let queue = IngestionQueue::new(&config, QueueCollaborators::default()).unwrap();
///
/// queue.enqueue(LogRecord::new(LogLevel::Info, "a"));
/// queue.enqueue(LogRecord::new(LogLevel::Info, "b"));
/// let outcome = queue.enqueue(LogRecord::new(LogLevel::Info, "c"));
///
/// assert_eq!(outcome, EnqueueOutcome::Evicted { sequence: 0 });
/// assert!(queue.is_full());
/// queue.flush();
/// assert_eq!(queue.size(), 0);
/// ```
pub struct IngestionQueue {
    shared: Arc<QueueShared>,
}

impl IngestionQueue {
    pub fn new(config: &QueueConfig, collaborators: QueueCollaborators) -> Result<Self> {
        config.validate()?;

        let (wake_tx, wake_rx) = bounded(1);
        let QueueCollaborators {
            collector,
            workers,
            batcher,
            recycle,
            on_overflow,
        } = collaborators;

        Ok(Self {
            shared: Arc::new(QueueShared {
                config: config.clone(),
                state: Mutex::new(QueueState {
                    slots: VecDeque::with_capacity(config.capacity),
                    next_sequence: 0,
                    consumer_active: false,
                }),
                dispatch_lock: Mutex::new(()),
                sinks: RwLock::new(Vec::new()),
                metrics: QueueMetrics::new(),
                collector,
                workers,
                batcher,
                recycle,
                on_overflow,
                wake_tx,
                wake_rx,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.shared.sinks.write().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.shared.sinks.read().len()
    }

    /// Queue a record without blocking
    ///
    /// Never fails; the outcome says whether the overflow policy had to
    /// step in.
    pub fn enqueue(&self, record: LogRecord) -> EnqueueOutcome {
        let shared = &self.shared;
        let policy = shared.config.overflow_policy;

        let (outcome, evicted, start_consumer) = {
            let mut state = shared.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let mut evicted = None;
            let outcome = if state.slots.len() < shared.config.capacity {
                state.slots.push_back(QueueSlot { sequence, record });
                EnqueueOutcome::Accepted
            } else {
                match policy {
                    OverflowPolicy::EvictOldest => {
                        evicted = state.slots.pop_front();
                        state.slots.push_back(QueueSlot { sequence, record });
                        EnqueueOutcome::Evicted {
                            sequence: evicted.as_ref().map_or(sequence, |slot| slot.sequence),
                        }
                    }
                    OverflowPolicy::RejectNewest => {
                        evicted = Some(QueueSlot { sequence, record });
                        EnqueueOutcome::Rejected
                    }
                }
            };

            let start = !state.consumer_active
                && !state.slots.is_empty()
                && !shared.shutdown.load(Ordering::Acquire);
            if start {
                state.consumer_active = true;
            }
            (outcome, evicted, start)
        };

        match outcome {
            EnqueueOutcome::Accepted => {
                shared.metrics.record_enqueued();
            }
            EnqueueOutcome::Evicted { .. } => {
                shared.metrics.record_enqueued();
                shared.metrics.record_evicted();
                shared.overflow_alert(policy);
            }
            EnqueueOutcome::Rejected => {
                shared.metrics.record_rejected();
                shared.overflow_alert(policy);
            }
        }

        if let (Some(slot), Some(pools)) = (evicted, &shared.recycle) {
            pools.recycle_record(slot.record);
        }

        if start_consumer {
            self.start_consumer();
        }
        outcome
    }

    fn start_consumer(&self) {
        // A fresh thread waits out a full interval before its first round
        while self.shared.wake_rx.try_recv().is_ok() {}

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("log-pipeline-drain".to_string())
            .spawn(move || shared.consume());

        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to start drain thread, draining inline");
            self.shared.state.lock().consumer_active = false;
            while self.shared.drain_round(None) > 0 {}
        }
    }

    /// Dispatch everything queued so far on the calling thread
    ///
    /// Returns once every record queued before the call has been handed to
    /// the sinks (or was evicted meanwhile). Records enqueued concurrently
    /// are left to the drain thread.
    pub fn flush(&self) {
        let before = self.shared.state.lock().next_sequence;
        while self.shared.drain_round(Some(before)) > 0 {}
        self.shared.flush_sinks();

        // Let a running drain thread notice the empty queue and exit
        if self.shared.state.lock().consumer_active {
            let _ = self.shared.wake_tx.try_send(());
        }
    }

    /// Records currently waiting; advisory under concurrency
    pub fn size(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Whether the queue is at capacity; advisory under concurrency
    pub fn is_full(&self) -> bool {
        self.size() >= self.shared.config.capacity
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.shared.config.overflow_policy
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.shared.metrics
    }

    /// Whether a drain thread is currently running
    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().consumer_active
    }

    /// Stop the drain thread
    ///
    /// Records enqueued afterwards stay queued until the next
    /// [`flush`](Self::flush).
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.wake_tx.try_send(());
    }
}

impl Drop for IngestionQueue {
    fn drop(&mut self) {
        self.flush();
        self.shutdown();
    }
}

impl std::fmt::Debug for IngestionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionQueue")
            .field("config", &self.shared.config)
            .field("size", &self.size())
            .field("sinks", &self.sink_count())
            .field("metrics", &self.shared.metrics)
            .finish()
    }
}
