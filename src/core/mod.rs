//! Core record types, sink trait and configuration

pub mod config;
pub mod error;
pub mod format;
pub mod log_context;
pub mod log_level;
pub mod log_record;
pub mod metrics;
pub mod overflow_policy;
pub mod sink;

pub use config::{BatchConfig, PipelineConfig, PoolConfig, QueueConfig, WorkerConfig};
pub use error::{PipelineError, Result, TaskError};
pub use format::{FormatRequest, RecordFormat};
pub use log_context::{FieldValue, LogContext};
pub use log_level::{HandlerClass, LogLevel};
pub use log_record::{CapturedTrace, Event, LogRecord, Message};
pub use metrics::QueueMetrics;
pub use overflow_policy::{OverflowCallback, OverflowPolicy};
pub use sink::{deliver, Dispatch, Sink};
