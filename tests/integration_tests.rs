//! Integration tests for the log pipeline
//!
//! These tests verify:
//! - Queue sizing and eviction under overflow
//! - Flush semantics
//! - Per-sink failure isolation
//! - Concurrent producers without loss or duplication
//! - Batch compression end to end
//! - Configuration loading

use log_pipeline::compression::CompressionBatcher;
use log_pipeline::core::{BatchConfig, Dispatch, QueueConfig};
use log_pipeline::prelude::*;
use log_pipeline::queue::{IngestionQueue, QueueCollaborators};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sink that remembers every message it was handed, in order
#[derive(Default)]
struct MemorySink {
    name: &'static str,
    messages: Mutex<Vec<String>>,
    formatted: Mutex<Vec<String>>,
}

impl MemorySink {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    fn record(&self, dispatch: &Dispatch<'_>) -> Result<()> {
        self.messages
            .lock()
            .push(dispatch.record.message.summary().into_owned());
        if let Some(line) = dispatch.formatted {
            self.formatted.lock().push(line.to_string());
        }
        Ok(())
    }
}

impl Sink for MemorySink {
    fn on_debug(&self, dispatch: &Dispatch<'_>) -> Result<()> {
        self.record(dispatch)
    }

    fn on_warning(&self, dispatch: &Dispatch<'_>) -> Result<()> {
        self.record(dispatch)
    }

    fn on_error(&self, dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
        self.record(dispatch)
    }

    fn on_fatal(&self, dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
        self.record(dispatch)
    }

    fn name(&self) -> &str {
        if self.name.is_empty() {
            "memory"
        } else {
            self.name
        }
    }
}

/// Sink that fails every warning and panics on every error
struct BrokenSink;

impl Sink for BrokenSink {
    fn on_debug(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
        Ok(())
    }

    fn on_warning(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
        Err(PipelineError::sink("broken", "connection refused"))
    }

    fn on_error(&self, _dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
        panic!("sink bug");
    }

    fn on_fatal(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
        self.on_error(dispatch, trace)
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn queue(capacity: usize) -> (IngestionQueue, Arc<MemorySink>) {
    let config = QueueConfig {
        capacity,
        ..QueueConfig::default()
    };
    let queue = IngestionQueue::new(&config, QueueCollaborators::default()).unwrap();
    let sink = Arc::new(MemorySink::default());
    queue.add_sink(sink.clone());
    (queue, sink)
}

fn info(message: impl Into<String>) -> LogRecord {
    LogRecord::new(LogLevel::Info, message.into())
}

#[test]
fn test_size_tracks_enqueues_up_to_capacity() {
    let capacity = 10;
    let (queue, sink) = queue(capacity);

    for i in 0..capacity {
        queue.enqueue(info(format!("tag-{}", i)));
        assert_eq!(queue.size(), i + 1);
    }
    assert!(queue.is_full());

    // One past capacity: size holds and the first tag is gone
    let outcome = queue.enqueue(info(format!("tag-{}", capacity)));
    assert!(matches!(outcome, EnqueueOutcome::Evicted { sequence: 0 }));
    assert_eq!(queue.size(), capacity);

    queue.flush();
    let seen = sink.messages();
    assert_eq!(seen.len(), capacity);
    assert!(!seen.contains(&"tag-0".to_string()));
    assert_eq!(seen.last().map(String::as_str), Some("tag-10"));
}

#[test]
fn test_capacity_three_scenario() {
    let (queue, sink) = queue(3);
    for tag in ["A", "B", "C", "D"] {
        queue.enqueue(info(tag));
    }
    queue.flush();
    assert_eq!(sink.messages(), ["B", "C", "D"]);
}

#[test]
fn test_flush_twice_on_empty_queue_dispatches_nothing_twice() {
    let (queue, sink) = queue(10);
    queue.enqueue(info("once"));
    queue.flush();
    queue.flush();
    queue.flush();
    assert_eq!(sink.messages(), ["once"]);
    assert_eq!(queue.metrics().dispatched_count(), 1);
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    let pipeline = Pipeline::builder()
        .queue_capacity(1000)
        .compression(false)
        .drain_interval(Duration::from_millis(5))
        .build()
        .unwrap();
    let sink = Arc::new(MemorySink::default());
    pipeline.add_sink(sink.clone());
    let pipeline = Arc::new(pipeline);

    let producers: Vec<_> = (0..5)
        .map(|p| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                for i in 0..200 {
                    pipeline.enqueue(info(format!("{}:{}", p, i)));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    pipeline.flush();

    let seen = sink.messages();
    assert_eq!(seen.len(), 1000);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 1000);
    assert_eq!(pipeline.metrics().dropped_count(), 0);

    // Each producer's records arrive in its own order
    for p in 0..5 {
        let prefix = format!("{}:", p);
        let order: Vec<u32> = seen
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(order, (0..200).collect::<Vec<_>>());
    }
}

#[test]
fn test_broken_sink_does_not_affect_others() {
    let healthy = Arc::new(MemorySink::named("healthy"));
    let pipeline = Pipeline::builder()
        .sink(BrokenSink)
        .shared_sink(healthy.clone())
        .compression(false)
        .build()
        .unwrap();

    pipeline.info("fine");
    pipeline.warn("fails on broken");
    pipeline.error("panics on broken");
    pipeline.flush();

    assert_eq!(
        healthy.messages(),
        ["fine", "fails on broken", "panics on broken"]
    );

    let broken = pipeline.collector().get_stats("sink.broken").unwrap();
    assert_eq!(broken.count, 3);
    assert_eq!(broken.errors, 2);
    assert_eq!(pipeline.metrics().sink_failure_count(), 2);
    assert_eq!(pipeline.collector().get_stats("sink.healthy").unwrap().errors, 0);
}

#[test]
fn test_preformatted_lines_reach_sinks() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::builder()
        .preformat(RecordFormat::Json)
        .shared_sink(sink.clone())
        .build()
        .unwrap();

    pipeline.log_with_context(
        LogLevel::Info,
        "order placed",
        LogContext::new().with_field("order_id", 7),
    );
    pipeline.flush();

    let lines = sink.formatted.lock().clone();
    assert_eq!(lines.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(value["message"], "order placed");
    assert_eq!(value["order_id"], 7);
    assert!(pipeline.workers().stats().submitted >= 1);
}

#[test]
fn test_large_messages_compress_well() {
    let batcher = CompressionBatcher::new(
        &BatchConfig::default(),
        Arc::new(MetricsCollector::new()),
        None,
        None,
    )
    .unwrap();

    let records: Vec<_> = (0..10)
        .map(|i| info(format!("{}{}", i, "x".repeat(499))))
        .collect();
    let batch = batcher.compress_batch(&records).unwrap();

    assert_eq!(batch.log_count, 10);
    assert!(batch.compressed_size < batch.uncompressed_size);
    assert!(batch.compression_ratio < 1.0);
    assert_eq!(batch.records().unwrap(), records);
}

#[test]
fn test_pipeline_batches_everything_it_dispatches() {
    let pipeline = Pipeline::builder().batch_size(25).build().unwrap();
    let batches = pipeline.subscribe_batches().unwrap();

    for i in 0..60 {
        pipeline.info(format!("event {}", i));
    }
    pipeline.flush();

    let received: Vec<_> = batches.try_iter().collect();
    let counts: Vec<_> = received.iter().map(|b| b.log_count).collect();
    assert_eq!(counts, [25, 25, 10]);

    let decoded: Vec<String> = received
        .iter()
        .flat_map(|b| b.records().unwrap())
        .map(|r| r.message.summary().into_owned())
        .collect();
    let expected: Vec<String> = (0..60).map(|i| format!("event {}", i)).collect();
    assert_eq!(decoded, expected);

    let stats = pipeline.stats();
    assert_eq!(stats.batches.unwrap().records_batched, 60);
    assert_eq!(
        pipeline
            .collector()
            .get_stats("compression.batch")
            .unwrap()
            .count,
        3
    );
}

#[test]
fn test_pipeline_from_json_config() {
    let config = PipelineConfig::from_json_str(
        r#"{
            "queue": { "capacity": 2, "overflow_policy": "reject_newest", "drain_interval_ms": 50 },
            "workers": { "workers": 2 },
            "compression": { "enabled": false }
        }"#,
    )
    .unwrap();
    let pipeline = Pipeline::from_config(config).unwrap();
    let sink = Arc::new(MemorySink::default());
    pipeline.add_sink(sink.clone());

    assert_eq!(pipeline.enqueue(info("1")), EnqueueOutcome::Accepted);
    assert_eq!(pipeline.enqueue(info("2")), EnqueueOutcome::Accepted);
    assert_eq!(pipeline.enqueue(info("3")), EnqueueOutcome::Rejected);
    assert_eq!(pipeline.workers().worker_count(), 2);

    pipeline.flush();
    assert_eq!(sink.messages(), ["1", "2"]);
    assert!((pipeline.metrics().drop_rate() - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_invalid_json_config_is_rejected() {
    let err = PipelineConfig::from_json_str(r#"{ "workers": { "workers": 0 } }"#).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));

    let err = PipelineConfig::from_json_str("not json").unwrap_err();
    assert!(matches!(err, PipelineError::JsonError(_)));
}

#[test]
fn test_drain_thread_delivers_without_flush() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::builder()
        .drain_interval(Duration::from_millis(10))
        .shared_sink(sink.clone())
        .build()
        .unwrap();

    pipeline.info("background");

    for _ in 0..500 {
        if !sink.messages().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sink.messages(), ["background"]);
}
