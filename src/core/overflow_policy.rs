//! Overflow policies for the ingestion queue
//!
//! When the queue is at capacity, the policy decides which record loses:
//! the oldest one still waiting, or the one being enqueued.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Policy for handling a full ingestion queue
///
/// Neither policy ever blocks the producer.
///
/// # Example
///
/// ```
/// use log_pipeline::OverflowPolicy;
///
/// // Default behavior: freshest records win
/// let policy = OverflowPolicy::default();
/// assert_eq!(policy, OverflowPolicy::EvictOldest);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued record to admit the new one
    #[default]
    EvictOldest,

    /// Keep the queue as is and discard the record being enqueued
    RejectNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::EvictOldest => write!(f, "EvictOldest"),
            OverflowPolicy::RejectNewest => write!(f, "RejectNewest"),
        }
    }
}

/// Callback type for overflow notifications
///
/// Called when records are dropped due to queue overflow.
/// The parameter is the total count of dropped records so far.
pub type OverflowCallback = Arc<dyn Fn(u64) + Send + Sync>;
