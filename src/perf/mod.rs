//! Performance measurement

pub mod collector;

pub use collector::{MetricsCollector, OperationSample, OperationStats};
