//! Worker pool for CPU-bound pipeline work

pub mod pool;
pub mod task;

pub use pool::{WorkerPool, WorkerStats};
pub use task::{CustomJob, Task, TaskKind, TaskOutput};
