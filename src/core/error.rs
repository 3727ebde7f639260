//! Error types for the log pipeline

use std::time::Duration;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration with details
    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// A sink handler returned an error
    #[error("Sink '{sink}' failed: {message}")]
    SinkFailed { sink: String, message: String },

    /// A sink handler panicked
    #[error("Sink '{sink}' panicked: {message}")]
    SinkPanicked { sink: String, message: String },

    /// Work submitted to the worker pool did not succeed
    #[error("Worker task failed: {0}")]
    Task(#[from] TaskError),

    /// Batch compression or decompression failure
    #[error("Compression error ({operation}): {message}")]
    Compression { operation: String, message: String },

    /// Attempted to seal a batch with no records
    #[error("Cannot compress an empty batch")]
    EmptyBatch,

    /// Background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a sink failure error
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::SinkFailed {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a compression error
    pub fn compression(operation: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Compression {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a thread spawn error
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Spawn {
            name: name.into(),
            source,
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PipelineError::Other(msg.into())
    }
}

/// Terminal failure reply for a unit of work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task ran and returned an error
    #[error("{kind} task failed: {message}")]
    Failed { kind: String, message: String },

    /// The task panicked inside its worker
    #[error("{kind} task panicked: {message}")]
    Panicked { kind: String, message: String },

    /// The worker was shut down before replying
    #[error("Task abandoned before completion")]
    Abandoned,

    /// No reply arrived within the caller's deadline
    #[error("Task timed out after {0:?}")]
    TimedOut(Duration),

    /// The reply did not have the shape the caller expected
    #[error("Unexpected {actual} output from {kind} task")]
    UnexpectedOutput { kind: String, actual: String },
}

impl TaskError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Whether the task never ran to completion on a worker
    ///
    /// Callers may retry such work inline; a `Failed` or `Panicked` task
    /// would fail the same way again.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TaskError::Abandoned | TaskError::TimedOut(_))
    }
}

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
