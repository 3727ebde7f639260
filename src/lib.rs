//! # Log Pipeline
//!
//! An asynchronous log-processing pipeline that sits between application
//! call sites and pluggable sinks.
//!
//! ## Features
//!
//! - **Non-blocking ingestion**: Bounded queue with an explicit overflow policy
//! - **Worker pool**: Formatting, serialization and compression off the hot path
//! - **Object reuse**: Pooled records, events, buffers and context maps
//! - **Batch compression**: Gzip batches published to subscribers
//! - **Latency metrics**: Rolling per-operation statistics
//!
//! ## Example
//!
//! ```
//! use log_pipeline::prelude::*;
//!
//! let pipeline = Pipeline::builder()
//!     .sink(ConsoleSink::new())
//!     .build()
//!     .unwrap();
//!
//! pipeline.info("request served");
//! pipeline.log_with_context(
//!     LogLevel::Warn,
//!     "slow query",
//!     LogContext::new().with_field("millis", 1250),
//! );
//! pipeline.shutdown();
//! ```

pub mod compression;
pub mod core;
pub mod perf;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod sinks;
pub mod worker;

pub mod prelude {
    pub use crate::compression::{Batch, CompressionBatcher};
    pub use crate::core::{
        CapturedTrace, Dispatch, Event, FieldValue, LogContext, LogLevel, LogRecord, Message,
        OverflowCallback, OverflowPolicy, PipelineConfig, PipelineError, RecordFormat, Result,
        Sink, TaskError,
    };
    pub use crate::perf::MetricsCollector;
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::queue::EnqueueOutcome;
    #[cfg(feature = "console")]
    pub use crate::sinks::ConsoleSink;
}

pub use compression::{Batch, BatcherStats, CompressionBatcher};
pub use core::{
    CapturedTrace, Dispatch, Event, FieldValue, LogContext, LogLevel, LogRecord, Message,
    OverflowCallback, OverflowPolicy, PipelineConfig, PipelineError, QueueMetrics, RecordFormat,
    Result, Sink, TaskError,
};
pub use perf::{MetricsCollector, OperationStats};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStats};
pub use pool::{ObjectPool, ObjectPools, Pooled};
pub use queue::{EnqueueOutcome, IngestionQueue};
#[cfg(feature = "console")]
pub use sinks::ConsoleSink;
pub use worker::{Task, TaskOutput, WorkerPool};
