//! Pools for the pipeline's hot-path allocations

use super::object_pool::{ObjectPool, PoolStats, Pooled, Reusable};
use crate::core::{config::PoolConfig, Event, LogContext, LogLevel, LogRecord, Message};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

impl Reusable for LogRecord {
    fn reset(&mut self) {
        // Keep the text buffer's capacity; everything else goes back to default
        match self.message {
            Message::Text(ref mut text) => text.clear(),
            _ => self.message = Message::default(),
        }
        self.level = LogLevel::default();
        self.timestamp = DateTime::<Utc>::default();
        self.event = None;
        self.context = None;
        self.trace = None;
    }
}

impl Reusable for Event {
    fn reset(&mut self) {
        self.name.clear();
        self.params.clear();
    }
}

impl Reusable for LogContext {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Kinds of pooled values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Record,
    Event,
    Buffer,
    Context,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Record => write!(f, "record"),
            PoolKind::Event => write!(f, "event"),
            PoolKind::Buffer => write!(f, "buffer"),
            PoolKind::Context => write!(f, "context"),
        }
    }
}

/// One pool per kind, all sharing the same ceiling and warm size
#[derive(Debug, Clone)]
pub struct ObjectPools {
    records: ObjectPool<LogRecord>,
    events: ObjectPool<Event>,
    buffers: ObjectPool<Vec<u8>>,
    contexts: ObjectPool<LogContext>,
}

impl ObjectPools {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            records: ObjectPool::new(config.max_size, config.initial_size),
            events: ObjectPool::new(config.max_size, config.initial_size),
            buffers: ObjectPool::new(config.max_size, config.initial_size),
            contexts: ObjectPool::new(config.max_size, config.initial_size),
        }
    }

    pub fn records(&self) -> &ObjectPool<LogRecord> {
        &self.records
    }

    pub fn events(&self) -> &ObjectPool<Event> {
        &self.events
    }

    pub fn buffers(&self) -> &ObjectPool<Vec<u8>> {
        &self.buffers
    }

    pub fn contexts(&self) -> &ObjectPool<LogContext> {
        &self.contexts
    }

    /// A pooled record stamped with the current time
    ///
    /// Text messages are written into the slot's retained buffer.
    pub fn record(&self, level: LogLevel, message: impl Into<Message>) -> Pooled<LogRecord> {
        let mut record = self.records.acquire();
        record.level = level;
        record.timestamp = Utc::now();
        match (&mut record.message, message.into()) {
            (Message::Text(buf), Message::Text(text)) => buf.push_str(&text),
            (slot, other) => *slot = other,
        }
        record
    }

    /// A pooled event with the given name
    pub fn event(&self, name: &str) -> Pooled<Event> {
        let mut event = self.events.acquire();
        event.name.push_str(name);
        event
    }

    /// A pooled, empty context
    pub fn context(&self) -> Pooled<LogContext> {
        self.contexts.acquire()
    }

    /// Take back a finished record along with its context and event
    pub fn recycle_record(&self, mut record: LogRecord) {
        if let Some(context) = record.context.take() {
            self.contexts.recycle(context);
        }
        if let Some(event) = record.event.take() {
            self.events.recycle(event);
        }
        self.records.recycle(record);
    }

    pub fn stats(&self) -> BTreeMap<PoolKind, PoolStats> {
        BTreeMap::from([
            (PoolKind::Record, self.records.stats()),
            (PoolKind::Event, self.events.stats()),
            (PoolKind::Buffer, self.buffers.stats()),
            (PoolKind::Context, self.contexts.stats()),
        ])
    }
}

impl From<Pooled<LogContext>> for LogContext {
    fn from(pooled: Pooled<LogContext>) -> Self {
        pooled.into_inner()
    }
}

impl From<Pooled<Event>> for Event {
    fn from(pooled: Pooled<Event>) -> Self {
        pooled.into_inner()
    }
}

impl Default for ObjectPools {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}
