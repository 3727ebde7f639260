//! Fixed pool of pre-started worker threads
//!
//! Each worker owns a bounded mailbox. A submitted unit carries its own
//! one-shot reply channel, so replies can never be delivered to the wrong
//! caller no matter how many submissions are in flight.

use super::task::{run_isolated, Task, TaskOutput};
use crate::core::{config::WorkerConfig, PipelineError, Result, TaskError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Reply = std::result::Result<TaskOutput, TaskError>;

struct WorkUnit {
    task: Task,
    reply: Sender<Reply>,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    inline_fallbacks: AtomicU64,
    abandoned: AtomicU64,
}

impl WorkerCounters {
    fn record_reply(&self, reply: &Reply) {
        if reply.is_ok() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Snapshot of worker pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub workers: usize,
    /// Units accepted by a worker mailbox
    pub submitted: u64,
    /// Units that produced an output, inline runs included
    pub completed: u64,
    /// Units that failed or panicked, inline runs included
    pub failed: u64,
    /// Units run on the caller's thread because no mailbox had room
    pub inline_fallbacks: u64,
    /// Units dropped unexecuted at shutdown
    pub abandoned: u64,
}

/// Pool of worker threads started up front
///
/// # Example
///
/// ```
/// use log_pipeline::core::WorkerConfig;
/// use log_pipeline::worker::{Task, TaskOutput, WorkerPool};
///
/// let pool = WorkerPool::new(&WorkerConfig::default()).unwrap();
/// let out = pool.submit(Task::Serialize(serde_json::json!({"b": 1, "a": 2}))).unwrap();
/// assert_eq!(out, TaskOutput::Text(r#"{"a":2,"b":1}"#.to_string()));
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    mailboxes: RwLock<Vec<Sender<WorkUnit>>>,
    worker_count: usize,
    next: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
}

impl WorkerPool {
    /// Start `config.workers` threads
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        config.validate()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WorkerCounters::default());
        let mut mailboxes = Vec::with_capacity(config.workers);

        for id in 0..config.workers {
            let (sender, receiver) = bounded(config.mailbox_capacity);
            let worker_shutdown = Arc::clone(&shutdown);
            let worker_counters = Arc::clone(&counters);

            let spawned = thread::Builder::new()
                .name(format!("log-pipeline-worker-{}", id))
                .spawn(move || worker_loop(id, receiver, worker_shutdown, worker_counters));

            if let Err(e) = spawned {
                // Threads already started exit once their mailbox closes
                shutdown.store(true, Ordering::Release);
                return Err(PipelineError::spawn(format!("worker-{}", id), e));
            }
            mailboxes.push(sender);
        }

        tracing::debug!(workers = config.workers, "worker pool started");

        Ok(Self {
            mailboxes: RwLock::new(mailboxes),
            worker_count: config.workers,
            next: AtomicUsize::new(0),
            shutdown,
            counters,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run a task on a worker and wait for its reply
    ///
    /// When every mailbox is full, or the pool has been shut down, the task
    /// runs on the caller's thread instead.
    pub fn submit(&self, task: Task) -> Reply {
        match self.dispatch(task) {
            Ok(reply) => reply.recv().unwrap_or(Err(TaskError::Abandoned)),
            Err(task) => self.run_inline(task),
        }
    }

    /// Like [`submit`](Self::submit) but gives up after `timeout`
    ///
    /// A timed-out unit still runs to completion on its worker; its reply is
    /// discarded.
    pub fn submit_timeout(&self, task: Task, timeout: Duration) -> Reply {
        match self.dispatch(task) {
            Ok(reply) => match reply.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(TaskError::TimedOut(timeout)),
                Err(RecvTimeoutError::Disconnected) => Err(TaskError::Abandoned),
            },
            Err(task) => self.run_inline(task),
        }
    }

    /// Stop all workers without waiting for them
    ///
    /// Units still sitting in a mailbox are dropped, which resolves their
    /// submitters with [`TaskError::Abandoned`]. A unit already executing
    /// finishes and replies normally.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders closes every mailbox
        self.mailboxes.write().clear();
        tracing::debug!(workers = self.worker_count, "worker pool shut down");
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            workers: self.worker_count,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            inline_fallbacks: self.counters.inline_fallbacks.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Hand the task to the first mailbox with room, starting round-robin
    fn dispatch(&self, task: Task) -> std::result::Result<Receiver<Reply>, Task> {
        if self.is_shutdown() {
            return Err(task);
        }

        let mailboxes = self.mailboxes.read();
        if mailboxes.is_empty() {
            return Err(task);
        }

        let (reply_tx, reply_rx) = bounded(1);
        let mut unit = WorkUnit {
            task,
            reply: reply_tx,
        };

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..mailboxes.len() {
            let mailbox = &mailboxes[(start + offset) % mailboxes.len()];
            match mailbox.try_send(unit) {
                Ok(()) => {
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    return Ok(reply_rx);
                }
                Err(TrySendError::Full(returned)) | Err(TrySendError::Disconnected(returned)) => {
                    unit = returned;
                }
            }
        }

        Err(unit.task)
    }

    fn run_inline(&self, task: Task) -> Reply {
        let previous = self.counters.inline_fallbacks.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            tracing::debug!(kind = %task.kind(), "no worker available, running task inline");
        }
        let reply = run_isolated(task);
        self.counters.record_reply(&reply);
        reply
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(
    id: usize,
    mailbox: Receiver<WorkUnit>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
) {
    while let Ok(unit) = mailbox.recv() {
        if shutdown.load(Ordering::Acquire) {
            // Dropping the unit disconnects its reply channel
            counters.abandoned.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let kind = unit.task.kind();
        let reply = run_isolated(unit.task);
        counters.record_reply(&reply);
        if let Err(TaskError::Panicked { ref message, .. }) = reply {
            tracing::warn!(worker = id, %kind, panic = %message, "task panicked");
        }

        // The submitter may have timed out and gone away
        let _ = unit.reply.send(reply);
    }
    tracing::trace!(worker = id, "worker exited");
}
