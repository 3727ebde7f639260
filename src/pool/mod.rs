//! Object reuse for records, events, byte buffers and context maps

pub mod object_pool;
pub mod pools;

pub use object_pool::{ObjectPool, PoolStats, Pooled, Reusable};
pub use pools::{ObjectPools, PoolKind};
