//! Batch compression of drained records

pub mod batch;
pub mod batcher;
pub mod codec;

pub use batch::{Batch, TimeRange};
pub use batcher::{BatcherStats, CompressionBatcher, COMPRESSION_OPERATION};
