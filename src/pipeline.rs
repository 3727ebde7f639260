//! Pipeline context and builder
//!
//! A [`Pipeline`] owns one instance of every component and wires them
//! together: records enter through the ingestion queue, are dispatched to the
//! sinks, optionally pre-formatted on the worker pool, and then either batched
//! for compression or handed back to the record pool.

use crate::compression::{Batch, BatcherStats, CompressionBatcher};
use crate::core::{
    CapturedTrace, Event, LogContext, LogLevel, LogRecord, Message, OverflowCallback,
    OverflowPolicy, PipelineConfig, PipelineError, QueueMetrics, RecordFormat, Result, Sink,
};
use crate::perf::{MetricsCollector, OperationStats};
use crate::pool::{ObjectPools, PoolKind, PoolStats, Pooled};
use crate::queue::{EnqueueOutcome, IngestionQueue, QueueCollaborators};
use crate::worker::{WorkerPool, WorkerStats};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ingestion queue counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub size: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub sink_failures: u64,
    /// Percentage of offered records shed by the overflow policy
    pub drop_rate: f64,
}

/// Everything the pipeline reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub queue: QueueSnapshot,
    pub workers: WorkerStats,
    pub pools: BTreeMap<PoolKind, PoolStats>,
    pub batches: Option<BatcherStats>,
    pub operations: BTreeMap<String, OperationStats>,
}

/// The assembled pipeline
///
/// # Example
///
/// ```
/// use log_pipeline::prelude::*;
///
/// let pipeline = Pipeline::builder()
///     .min_level(LogLevel::Debug)
///     .sink(ConsoleSink::with_colors(false))
///     .queue_capacity(500)
///     .build()
///     .unwrap();
///
/// pipeline.info("service started");
/// pipeline.flush();
/// assert_eq!(pipeline.metrics().dispatched_count(), 1);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    min_level: RwLock<LogLevel>,
    collector: Arc<MetricsCollector>,
    workers: Arc<WorkerPool>,
    pools: ObjectPools,
    batcher: Option<Arc<CompressionBatcher>>,
    queue: IngestionQueue,
    shut_down: AtomicBool,
}

impl Pipeline {
    /// Create a builder for Pipeline
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Build a pipeline with no sinks from a configuration
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        PipelineBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn set_min_level(&self, level: LogLevel) {
        *self.min_level.write() = level;
    }

    pub fn min_level(&self) -> LogLevel {
        *self.min_level.read()
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.queue.add_sink(sink);
    }

    /// Queue a record as is, without level filtering
    pub fn enqueue(&self, record: LogRecord) -> EnqueueOutcome {
        self.queue.enqueue(record)
    }

    /// Build a record from the record pool and queue it
    ///
    /// Records below the minimum level are not built at all.
    pub fn log(&self, level: LogLevel, message: impl Into<Message>) {
        if level < self.min_level() {
            return;
        }
        let record = self.pools.record(level, message).into_inner();
        self.queue.enqueue(record);
    }

    #[inline]
    pub fn trace(&self, message: impl Into<Message>) {
        self.log(LogLevel::Trace, message);
    }

    #[inline]
    pub fn debug(&self, message: impl Into<Message>) {
        self.log(LogLevel::Debug, message);
    }

    #[inline]
    pub fn info(&self, message: impl Into<Message>) {
        self.log(LogLevel::Info, message);
    }

    #[inline]
    pub fn warn(&self, message: impl Into<Message>) {
        self.log(LogLevel::Warn, message);
    }

    #[inline]
    pub fn error(&self, message: impl Into<Message>) {
        self.log(LogLevel::Error, message);
    }

    #[inline]
    pub fn fatal(&self, message: impl Into<Message>) {
        self.log(LogLevel::Fatal, message);
    }

    /// An empty context from the pipeline's pool
    ///
    /// Hand it to [`log_with_context`](Self::log_with_context); it goes back
    /// to the pool once its record has been dispatched.
    pub fn context(&self) -> Pooled<LogContext> {
        self.pools.context()
    }

    /// A pooled event named `name`, for [`log_event`](Self::log_event)
    pub fn event(&self, name: &str) -> Pooled<Event> {
        self.pools.event(name)
    }

    /// Log with structured context fields
    pub fn log_with_context(
        &self,
        level: LogLevel,
        message: impl Into<Message>,
        context: impl Into<LogContext>,
    ) {
        if level < self.min_level() {
            return;
        }
        let mut record = self.pools.record(level, message).into_inner();
        record.context = Some(context.into());
        self.queue.enqueue(record);
    }

    /// Log a named event with its parameters
    pub fn log_event(&self, level: LogLevel, message: impl Into<Message>, event: impl Into<Event>) {
        if level < self.min_level() {
            return;
        }
        let mut record = self.pools.record(level, message).into_inner();
        record.event = Some(event.into());
        self.queue.enqueue(record);
    }

    /// Log an error with its cause chain and a backtrace of the caller
    pub fn log_error(&self, err: &(dyn std::error::Error + 'static)) {
        if LogLevel::Error < self.min_level() {
            return;
        }
        let mut record = self
            .pools
            .record(LogLevel::Error, Message::from_error(err))
            .into_inner();
        record.trace = Some(CapturedTrace::capture());
        self.queue.enqueue(record);
    }

    /// Dispatch everything queued so far, then seal the open batch
    pub fn flush(&self) {
        self.queue.flush();
        if let Some(batcher) = &self.batcher {
            batcher.flush();
        }
    }

    /// Receive every batch sealed from now on
    ///
    /// `None` when compression is disabled.
    pub fn subscribe_batches(&self) -> Option<Receiver<Arc<Batch>>> {
        self.batcher.as_ref().map(|batcher| batcher.subscribe())
    }

    /// Compress records out of band
    pub fn compress_batch(&self, records: &[LogRecord]) -> Result<Batch> {
        match &self.batcher {
            Some(batcher) => batcher.compress_batch(records),
            None => Err(PipelineError::config(
                "CompressionBatcher",
                "compression is disabled",
            )),
        }
    }

    pub fn metrics(&self) -> &QueueMetrics {
        self.queue.metrics()
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn pools(&self) -> &ObjectPools {
        &self.pools
    }

    pub fn batcher(&self) -> Option<&Arc<CompressionBatcher>> {
        self.batcher.as_ref()
    }

    pub fn queue(&self) -> &IngestionQueue {
        &self.queue
    }

    pub fn stats(&self) -> PipelineStats {
        let metrics = self.queue.metrics();
        PipelineStats {
            queue: QueueSnapshot {
                size: self.queue.size(),
                capacity: self.queue.capacity(),
                enqueued: metrics.enqueued_count(),
                evicted: metrics.evicted_count(),
                rejected: metrics.rejected_count(),
                dispatched: metrics.dispatched_count(),
                sink_failures: metrics.sink_failure_count(),
                drop_rate: metrics.drop_rate(),
            },
            workers: self.workers.stats(),
            pools: self.pools.stats(),
            batches: self.batcher.as_ref().map(|batcher| batcher.stats()),
            operations: self.collector.all_stats(),
        }
    }

    /// Flush, then stop every background thread
    ///
    /// Safe to call more than once; the pipeline also shuts down on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.flush();
        self.queue.shutdown();
        if let Some(batcher) = &self.batcher {
            batcher.shutdown();
        }
        self.workers.shutdown();
        tracing::debug!("pipeline shut down");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("min_level", &self.min_level())
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .field("batcher", &self.batcher)
            .finish()
    }
}

/// Builder for constructing a Pipeline with a fluent API
///
/// # Example
/// ```
/// use log_pipeline::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pipeline = Pipeline::builder()
///     .overflow_policy(OverflowPolicy::RejectNewest)
///     .drain_interval(Duration::from_millis(100))
///     .workers(2)
///     .preformat(RecordFormat::Logfmt)
///     .on_overflow(Arc::new(|count: u64| {
///         eprintln!("ALERT: {} records dropped", count);
///     }))
///     .build()
///     .unwrap();
/// # drop(pipeline);
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    min_level: LogLevel,
    sinks: Vec<Arc<dyn Sink>>,
    on_overflow: Option<OverflowCallback>,
}

impl PipelineBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            min_level: LogLevel::Info,
            sinks: Vec::new(),
            on_overflow: None,
        }
    }

    /// Replace the whole configuration
    #[must_use = "builder methods return a new value"]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set minimum log level for the `log` family of methods
    #[must_use = "builder methods return a new value"]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Add a sink
    #[must_use = "builder methods return a new value"]
    pub fn sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink the caller keeps a handle to
    #[must_use = "builder methods return a new value"]
    pub fn shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = capacity;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.queue.overflow_policy = policy;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.queue.drain_interval = interval;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn drain_batch_size(mut self, size: usize) -> Self {
        self.config.queue.drain_batch_size = size;
        self
    }

    /// Render each record on the worker pool before dispatch
    #[must_use = "builder methods return a new value"]
    pub fn preformat(mut self, format: RecordFormat) -> Self {
        self.config.queue.preformat = Some(format);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers.workers = workers;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.compression.batch_size = size;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.compression.interval = interval;
        self
    }

    /// Turn the compression batcher on or off
    #[must_use = "builder methods return a new value"]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression.enabled = enabled;
        self
    }

    /// Set a callback for overflow notifications
    ///
    /// Invoked on the first dropped record and every 1000th after that,
    /// with the total dropped so far.
    #[must_use = "builder methods return a new value"]
    pub fn on_overflow(mut self, callback: OverflowCallback) -> Self {
        self.on_overflow = Some(callback);
        self
    }

    /// Validate the configuration and start the pipeline
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let collector = Arc::new(MetricsCollector::with_window(config.sample_window));
        let workers = Arc::new(WorkerPool::new(&config.workers)?);
        let pools = ObjectPools::new(&config.pool);

        let batcher = if config.compression.enabled {
            Some(Arc::new(CompressionBatcher::new(
                &config.compression,
                Arc::clone(&collector),
                Some(Arc::clone(&workers)),
                Some(pools.clone()),
            )?))
        } else {
            None
        };

        let queue = IngestionQueue::new(
            &config.queue,
            QueueCollaborators {
                collector: Arc::clone(&collector),
                workers: Some(Arc::clone(&workers)),
                batcher: batcher.clone(),
                recycle: Some(pools.clone()),
                on_overflow: self.on_overflow,
            },
        )?;
        for sink in self.sinks {
            queue.add_sink(sink);
        }

        tracing::debug!(
            capacity = config.queue.capacity,
            workers = config.workers.workers,
            compression = config.compression.enabled,
            "pipeline started"
        );

        Ok(Pipeline {
            config,
            min_level: RwLock::new(self.min_level),
            collector,
            workers,
            pools,
            batcher,
            queue,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
