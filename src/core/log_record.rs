//! Log record structure

use super::log_context::{FieldValue, LogContext};
use super::log_level::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Message payload of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Message {
    /// Plain text
    Text(String),
    /// Structured key-value payload
    Structured(serde_json::Map<String, serde_json::Value>),
    /// An error description plus its cause chain or stack lines
    Error { error: String, trace: Vec<String> },
}

impl Message {
    /// Sanitize text to prevent log injection attacks
    ///
    /// Replaces newlines, carriage returns, and tabs with escape sequences
    /// to prevent attackers from injecting fake log entries.
    fn sanitize(message: &str) -> String {
        message
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
    }

    pub fn text(message: impl AsRef<str>) -> Self {
        Message::Text(Self::sanitize(message.as_ref()))
    }

    /// Build an error message whose trace is the error's `source()` chain
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        Message::Error {
            error: Self::sanitize(&err.to_string()),
            trace,
        }
    }

    /// One-line rendering used by formatters
    pub fn summary(&self) -> Cow<'_, str> {
        match self {
            Message::Text(s) => Cow::Borrowed(s),
            Message::Structured(map) => Cow::Owned(
                serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()),
            ),
            Message::Error { error, .. } => Cow::Borrowed(error),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Message::Text(s) => s.is_empty(),
            Message::Structured(map) => map.is_empty(),
            Message::Error { error, trace } => error.is_empty() && trace.is_empty(),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::Text(String::new())
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::text(s)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Message {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Message::Structured(map)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Named application event with free-form parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "LogContext::is_empty")]
    pub params: LogContext,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: LogContext::new(),
        }
    }

    pub fn with_param<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.params.add_field(key, value);
        self
    }
}

/// Execution trace captured at the call site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapturedTrace {
    frames: Vec<String>,
}

impl CapturedTrace {
    /// Capture the current thread's backtrace regardless of `RUST_BACKTRACE`
    pub fn capture() -> Self {
        let backtrace = std::backtrace::Backtrace::force_capture();
        Self::from_frames(
            backtrace
                .to_string()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// One logging call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: Message,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<CapturedTrace>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<Message>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            event: None,
            context: None,
            trace: None,
        }
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_context(mut self, context: LogContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_trace(mut self, trace: CapturedTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Attach a backtrace of the calling thread
    pub fn capture_trace(self) -> Self {
        self.with_trace(CapturedTrace::capture())
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Trace handed to error- and fatal-class handlers
    ///
    /// An explicitly captured trace wins over the cause chain of an
    /// error message.
    pub fn handler_trace(&self) -> Option<CapturedTrace> {
        if let Some(trace) = &self.trace {
            return Some(trace.clone());
        }
        match &self.message {
            Message::Error { trace, .. } if !trace.is_empty() => {
                Some(CapturedTrace::from_frames(trace.iter().cloned()))
            }
            _ => None,
        }
    }
}
