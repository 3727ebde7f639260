//! Pipeline configuration
//!
//! Every section has working defaults, so a config file only needs the
//! keys it wants to change. Durations are given in milliseconds.
//!
//! ```
//! use log_pipeline::PipelineConfig;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::from_json_str(
//!     r#"{ "queue": { "capacity": 50, "drain_interval_ms": 250 } }"#,
//! ).unwrap();
//!
//! assert_eq!(config.queue.capacity, 50);
//! assert_eq!(config.queue.drain_interval, Duration::from_millis(250));
//! assert_eq!(config.compression.batch_size, 100);
//! ```

use super::error::{PipelineError, Result};
use super::format::RecordFormat;
use super::overflow_policy::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ingestion queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Default wait between background drains
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of records dispatched per drain round
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 100;
/// Default number of pre-started workers
pub const DEFAULT_WORKERS: usize = 4;
/// Default number of units a worker may have waiting
pub const DEFAULT_MAILBOX_CAPACITY: usize = 8;
/// Upper bound on workers a pool may be configured with
pub const MAX_WORKERS: usize = 64;
/// Default object pool ceiling per kind
pub const DEFAULT_POOL_MAX_SIZE: usize = 1000;
/// Default object pool warm size per kind
pub const DEFAULT_POOL_INITIAL_SIZE: usize = 100;
/// Default records per compressed batch
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default time after which a partial batch is sealed
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(30);
/// Default gzip level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Default number of samples retained per measured operation
pub const DEFAULT_SAMPLE_WINDOW: usize = 100;

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    #[serde(rename = "drain_interval_ms", with = "duration_ms")]
    pub drain_interval: Duration,
    pub drain_batch_size: usize,
    pub overflow_policy: OverflowPolicy,
    /// Render each record through the worker pool before dispatch
    pub preformat: Option<RecordFormat>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            overflow_policy: OverflowPolicy::default(),
            preformat: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    pub mailbox_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Slots allocated up front; capped at `max_size`
    pub initial_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_MAX_SIZE,
            initial_size: DEFAULT_POOL_INITIAL_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    pub batch_size: usize,
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    pub compression_level: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_BATCH_INTERVAL,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub pool: PoolConfig,
    pub compression: BatchConfig,
    pub sample_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            pool: PoolConfig::default(),
            compression: BatchConfig::default(),
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.workers.validate()?;
        self.compression.validate()?;
        if self.sample_window == 0 {
            return Err(PipelineError::config(
                "MetricsCollector",
                "sample_window must be at least 1",
            ));
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::config("IngestionQueue", "capacity must be at least 1"));
        }
        if self.drain_batch_size == 0 {
            return Err(PipelineError::config(
                "IngestionQueue",
                "drain_batch_size must be at least 1",
            ));
        }
        if self.drain_interval.is_zero() {
            return Err(PipelineError::config(
                "IngestionQueue",
                "drain_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(PipelineError::config(
                "WorkerPool",
                format!("workers must be between 1 and {}", MAX_WORKERS),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(PipelineError::config(
                "WorkerPool",
                "mailbox_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::config(
                "CompressionBatcher",
                "batch_size must be at least 1",
            ));
        }
        if self.interval.is_zero() {
            return Err(PipelineError::config(
                "CompressionBatcher",
                "interval must be greater than zero",
            ));
        }
        if self.compression_level > 9 {
            return Err(PipelineError::config(
                "CompressionBatcher",
                "compression_level must be between 0 and 9",
            ));
        }
        Ok(())
    }
}
