//! Stress tests for concurrent use of the pipeline components
//!
//! These tests verify:
//! - Worker replies always reach their own submitter
//! - The queue stays bounded and consistent under overflow from many threads
//! - Pools and the metrics collector hold up under contention

use log_pipeline::core::{Dispatch, QueueConfig, WorkerConfig};
use log_pipeline::pool::ObjectPool;
use log_pipeline::prelude::*;
use log_pipeline::queue::{IngestionQueue, QueueCollaborators};
use log_pipeline::worker::{Task, TaskOutput, WorkerPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Counts deliveries without keeping records
#[derive(Default)]
struct CountingSink {
    delivered: AtomicU64,
}

impl CountingSink {
    fn bump(&self) -> Result<()> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Sink for CountingSink {
    fn on_debug(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
        self.bump()
    }

    fn on_warning(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
        self.bump()
    }

    fn on_error(&self, _dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
        self.bump()
    }

    fn on_fatal(&self, _dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
        self.bump()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// K concurrent submissions each get their own reply back
#[test]
fn test_worker_replies_have_no_cross_talk() {
    let pool = Arc::new(
        WorkerPool::new(&WorkerConfig {
            workers: 4,
            mailbox_capacity: 2,
        })
        .unwrap(),
    );

    let submitters: Vec<_> = (0..16)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..100 {
                    let value = serde_json::json!({ "submitter": t, "seq": i });
                    let reply = pool.submit(Task::Serialize(value)).unwrap();
                    let expected = format!(r#"{{"seq":{},"submitter":{}}}"#, i, t);
                    assert_eq!(reply, TaskOutput::Text(expected));
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }

    // Every unit ended on a worker or inline, never both
    let stats = pool.stats();
    assert_eq!(stats.completed, 1600);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.submitted + stats.inline_fallbacks, 1600);
}

/// Mixed task kinds, some failing, from many threads
#[test]
fn test_worker_failures_stay_with_their_submitter() {
    let pool = Arc::new(WorkerPool::new(&WorkerConfig::default()).unwrap());

    let submitters: Vec<_> = (0..8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50 {
                    if (t + i) % 3 == 0 {
                        let err = pool
                            .submit(Task::Decompress(vec![t as u8, i as u8]))
                            .unwrap_err();
                        assert!(matches!(err, TaskError::Failed { .. }));
                    } else {
                        let data = format!("payload {} {}", t, i).into_bytes();
                        let compressed = pool
                            .submit(Task::Compress {
                                data: data.clone(),
                                level: 1,
                            })
                            .unwrap();
                        let TaskOutput::Bytes(compressed) = compressed else {
                            panic!("compress returned text");
                        };
                        let restored = pool.submit(Task::Decompress(compressed)).unwrap();
                        assert_eq!(restored, TaskOutput::Bytes(data));
                    }
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }
    assert!(pool.stats().failed > 0);
}

/// Many producers overflowing a small queue
#[test]
fn test_queue_bounded_under_concurrent_overflow() {
    let capacity = 64;
    let config = QueueConfig {
        capacity,
        drain_interval: Duration::from_millis(1),
        drain_batch_size: 16,
        ..QueueConfig::default()
    };
    let queue = Arc::new(IngestionQueue::new(&config, QueueCollaborators::default()).unwrap());
    let sink = Arc::new(CountingSink::default());
    queue.add_sink(sink.clone());

    let producers: Vec<_> = (0..8)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..2_000 {
                    queue.enqueue(LogRecord::new(LogLevel::Debug, format!("{}-{}", p, i)));
                    assert!(queue.size() <= capacity);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    queue.flush();

    let metrics = queue.metrics();
    assert_eq!(queue.size(), 0);
    assert_eq!(metrics.enqueued_count(), 16_000);
    // Everything admitted was either delivered or evicted later
    assert_eq!(
        metrics.dispatched_count() + metrics.evicted_count(),
        metrics.enqueued_count()
    );
    assert_eq!(sink.delivered.load(Ordering::Relaxed), metrics.dispatched_count());
}

/// Full pipeline under load with every component enabled
#[test]
fn test_pipeline_under_load() {
    let sink = Arc::new(CountingSink::default());
    let pipeline = Arc::new(
        Pipeline::builder()
            .queue_capacity(10_000)
            .drain_interval(Duration::from_millis(2))
            .preformat(RecordFormat::Logfmt)
            .batch_size(50)
            .shared_sink(sink.clone())
            .build()
            .unwrap(),
    );
    let batches = pipeline.subscribe_batches().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                for i in 0..500 {
                    pipeline.log_with_context(
                        LogLevel::Info,
                        format!("request {}", i),
                        LogContext::new().with_field("producer", p as i64),
                    );
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    pipeline.flush();

    assert_eq!(sink.delivered.load(Ordering::Relaxed), 2_000);
    let batched: usize = batches.try_iter().map(|b| b.log_count).sum();
    assert_eq!(batched, 2_000);

    let stats = pipeline.stats();
    assert_eq!(stats.queue.evicted + stats.queue.rejected, 0);
    assert_eq!(stats.workers.failed, 0);
}

/// Pools shared across threads keep their ceiling
#[test]
fn test_pool_contention() {
    let pool: ObjectPool<LogRecord> = ObjectPool::new(32, 8);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for i in 0..1_000 {
                    let mut record = pool.acquire();
                    assert_eq!(record.message, Message::default());
                    record.message = Message::from(format!("msg {}", i));
                    record.level = LogLevel::Warn;
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.available <= 32);
    assert_eq!(stats.checked_out, 0);
}

/// The collector keeps a bounded window per operation under contention
#[test]
fn test_collector_contention() {
    let collector = Arc::new(MetricsCollector::new());

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for i in 0..500 {
                    let _: std::result::Result<(), ()> =
                        collector.measure(&format!("op.{}", t % 2), || {
                            if i % 10 == 0 {
                                Err(())
                            } else {
                                Ok(())
                            }
                        });
                }
            })
        })
        .collect();

    for handle in threads {
        handle.join().unwrap();
    }

    let all = collector.all_stats();
    assert_eq!(all.len(), 2);
    for stats in all.values() {
        assert_eq!(stats.count, collector.window() as u64);
        assert!(stats.min_duration <= stats.average_duration);
        assert!(stats.average_duration <= stats.max_duration);
    }
}
