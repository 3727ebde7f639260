//! Accumulates drained records and seals them into compressed batches
//!
//! A buffer is sealed when it reaches `batch_size`, when the periodic timer
//! fires with records pending, or on [`CompressionBatcher::flush`]. Sealed
//! batches are published to every live subscriber.

use super::batch::Batch;
use super::codec;
use crate::core::{config::BatchConfig, LogRecord, PipelineError, Result};
use crate::perf::MetricsCollector;
use crate::pool::{ObjectPool, ObjectPools, Pooled};
use crate::worker::{Task, TaskKind, TaskOutput, WorkerPool};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Operation name under which batch compression is timed
pub const COMPRESSION_OPERATION: &str = "compression.batch";

/// Worker task name for sealing a batch
pub const COMPRESS_BATCH_TASK: &str = "compress_batch";

// Serialization buffers kept by a batcher built without shared pools
const OWN_BUFFERS: usize = 2;

/// Snapshot of batcher activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub batches_emitted: u64,
    pub batches_failed: u64,
    pub records_batched: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Records waiting in the open buffer
    pub pending: usize,
}

#[derive(Debug, Default)]
struct BatcherCounters {
    batches_emitted: AtomicU64,
    batches_failed: AtomicU64,
    records_batched: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

struct BatcherInner {
    config: BatchConfig,
    buffer: Mutex<Vec<LogRecord>>,
    workers: Option<Arc<WorkerPool>>,
    collector: Arc<MetricsCollector>,
    recycle: Option<ObjectPools>,
    buffers: ObjectPool<Vec<u8>>,
    subscribers: Mutex<Vec<Sender<Arc<Batch>>>>,
    counters: BatcherCounters,
}

impl BatcherInner {
    fn add(&self, record: LogRecord) -> Option<Arc<Batch>> {
        let sealed = {
            let mut buffer = self.buffer.lock();
            buffer.push(record);
            if buffer.len() >= self.config.batch_size {
                Some(mem::replace(
                    &mut *buffer,
                    Vec::with_capacity(self.config.batch_size),
                ))
            } else {
                None
            }
        };
        sealed.and_then(|records| self.emit(records))
    }

    fn seal_pending(&self) -> Option<Arc<Batch>> {
        let records = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return None;
            }
            mem::take(&mut *buffer)
        };
        self.emit(records)
    }

    /// Compress and publish; a failure costs this batch only
    fn emit(&self, records: Vec<LogRecord>) -> Option<Arc<Batch>> {
        let count = records.len();
        let outcome = self.compress(&records);

        if let Some(pools) = &self.recycle {
            for record in records {
                pools.recycle_record(record);
            }
        }

        match outcome {
            Ok(batch) => {
                let batch = Arc::new(batch);
                self.counters.batches_emitted.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .records_batched
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters
                    .bytes_in
                    .fetch_add(batch.uncompressed_size as u64, Ordering::Relaxed);
                self.counters
                    .bytes_out
                    .fetch_add(batch.compressed_size as u64, Ordering::Relaxed);
                self.publish(&batch);
                Some(batch)
            }
            Err(e) => {
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(records = count, error = %e, "dropping batch after compression failure");
                None
            }
        }
    }

    fn publish(&self, batch: &Arc<Batch>) {
        let mut subscribers = self.subscribers.lock();
        // Unbounded channels only fail once the receiver is gone
        subscribers.retain(|subscriber| subscriber.send(Arc::clone(batch)).is_ok());
    }

    fn compress(&self, records: &[LogRecord]) -> Result<Batch> {
        if records.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        self.collector.measure(COMPRESSION_OPERATION, || -> Result<Batch> {
            let serialized = self.serialize(records)?;
            let uncompressed_size = serialized.len();
            let compressed = self.gzip(records, serialized)?;
            Ok(Batch::seal(records, compressed, uncompressed_size))
        })
    }

    /// JSON array of `records`, written into a pooled buffer
    fn serialize(&self, records: &[LogRecord]) -> Result<Pooled<Vec<u8>>> {
        let mut buffer = self.buffers.acquire();
        serde_json::to_writer(&mut *buffer, records)?;
        Ok(buffer)
    }

    // The buffer returns to its pool wherever the compression ends
    fn gzip(&self, records: &[LogRecord], serialized: Pooled<Vec<u8>>) -> Result<Vec<u8>> {
        let level = self.config.compression_level;

        let Some(workers) = &self.workers else {
            return codec::gzip(&serialized, level);
        };

        let task = Task::custom(COMPRESS_BATCH_TASK, move || {
            codec::gzip(&serialized, level)
                .map(TaskOutput::Bytes)
                .map_err(|e| e.to_string())
        });
        match workers.submit(task) {
            Ok(output) => Ok(output.into_bytes(TaskKind::Custom(COMPRESS_BATCH_TASK))?),
            Err(e) if e.is_unreachable() => {
                tracing::debug!(error = %e, "compressing batch inline");
                // The payload went down with the unit
                let serialized = self.serialize(records)?;
                codec::gzip(&serialized, level)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Batches and compresses records
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use log_pipeline::compression::CompressionBatcher;
/// use log_pipeline::core::{BatchConfig, LogLevel, LogRecord};
/// use log_pipeline::perf::MetricsCollector;
///
/// let config = BatchConfig { batch_size: 2, ..BatchConfig::default() };
/// let batcher = CompressionBatcher::new(&config, Arc::new(MetricsCollector::new()), None, None).unwrap();
/// let batches = batcher.subscribe();
///
/// batcher.add_record(LogRecord::new(LogLevel::Info, "one"));
/// batcher.add_record(LogRecord::new(LogLevel::Warn, "two"));
///
/// let batch = batches.recv().unwrap();
/// assert_eq!(batch.log_count, 2);
/// assert_eq!(batch.records().unwrap()[1].message.summary(), "two");
/// ```
pub struct CompressionBatcher {
    inner: Arc<BatcherInner>,
    timer: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl CompressionBatcher {
    /// Start a batcher and its interval timer
    ///
    /// With `workers`, compression runs on the worker pool. With `pools`,
    /// batches are serialized into its byte buffers and records (with
    /// their contexts and events) go back to it once their batch is
    /// sealed.
    pub fn new(
        config: &BatchConfig,
        collector: Arc<MetricsCollector>,
        workers: Option<Arc<WorkerPool>>,
        pools: Option<ObjectPools>,
    ) -> Result<Self> {
        config.validate()?;

        let buffers = match &pools {
            Some(pools) => pools.buffers().clone(),
            None => ObjectPool::new(OWN_BUFFERS, 0),
        };

        let inner = Arc::new(BatcherInner {
            config: config.clone(),
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            workers,
            collector,
            recycle: pools,
            buffers,
            subscribers: Mutex::new(Vec::new()),
            counters: BatcherCounters::default(),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let interval = config.interval;
        let timer_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("log-pipeline-batch-timer".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        timer_inner.seal_pending();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| PipelineError::spawn("batch-timer", e))?;

        Ok(Self {
            inner,
            timer: Mutex::new(Some((stop_tx, handle))),
        })
    }

    /// Append a record, sealing the buffer once it is full
    ///
    /// Returns the batch this call sealed, if any.
    pub fn add_record(&self, record: LogRecord) -> Option<Arc<Batch>> {
        self.inner.add(record)
    }

    /// Compress `records` right away, outside the buffer
    ///
    /// The batch is returned to the caller and not published.
    pub fn compress_batch(&self, records: &[LogRecord]) -> Result<Batch> {
        self.inner.compress(records)
    }

    /// Seal whatever is buffered now
    pub fn flush(&self) -> Option<Arc<Batch>> {
        self.inner.seal_pending()
    }

    /// Receive every batch sealed from now on
    pub fn subscribe(&self) -> Receiver<Arc<Batch>> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> BatcherStats {
        let counters = &self.inner.counters;
        BatcherStats {
            batches_emitted: counters.batches_emitted.load(Ordering::Relaxed),
            batches_failed: counters.batches_failed.load(Ordering::Relaxed),
            records_batched: counters.records_batched.load(Ordering::Relaxed),
            bytes_in: counters.bytes_in.load(Ordering::Relaxed),
            bytes_out: counters.bytes_out.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Stop the timer and seal what is left
    pub fn shutdown(&self) -> Option<Arc<Batch>> {
        if let Some((stop, handle)) = self.timer.lock().take() {
            drop(stop);
            if handle.join().is_err() {
                tracing::warn!("batch timer thread panicked");
            }
        }
        self.flush()
    }
}

impl Drop for CompressionBatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CompressionBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionBatcher")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
