//! Units of work accepted by the worker pool

use crate::compression::codec;
use crate::core::error::panic_message;
use crate::core::format::{FormatRequest, RecordFormat};
use crate::core::TaskError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Closure run by a [`Task::Custom`] unit
pub type CustomJob = Box<dyn FnOnce() -> Result<TaskOutput, String> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    FormatRecord,
    Serialize,
    Compress,
    Decompress,
    Custom(&'static str),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::FormatRecord => write!(f, "format_record"),
            TaskKind::Serialize => write!(f, "serialize"),
            TaskKind::Compress => write!(f, "compress"),
            TaskKind::Decompress => write!(f, "decompress"),
            TaskKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A task payload
///
/// Payloads are owned so that a unit carries everything it needs into the
/// worker and shares nothing with the submitter.
pub enum Task {
    /// Render a record into a display line
    FormatRecord {
        request: FormatRequest,
        format: RecordFormat,
    },
    /// Canonical JSON text of a value; object keys come out sorted
    Serialize(serde_json::Value),
    /// Gzip a byte payload
    Compress { data: Vec<u8>, level: u32 },
    /// Reverse of `Compress`
    Decompress(Vec<u8>),
    /// Caller-defined work
    Custom { name: &'static str, job: CustomJob },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::FormatRecord { .. } => TaskKind::FormatRecord,
            Task::Serialize(_) => TaskKind::Serialize,
            Task::Compress { .. } => TaskKind::Compress,
            Task::Decompress(_) => TaskKind::Decompress,
            Task::Custom { name, .. } => TaskKind::Custom(*name),
        }
    }

    /// Build a custom task from a closure
    pub fn custom<F>(name: &'static str, job: F) -> Self
    where
        F: FnOnce() -> Result<TaskOutput, String> + Send + 'static,
    {
        Task::Custom {
            name,
            job: Box::new(job),
        }
    }

    pub fn execute(self) -> Result<TaskOutput, TaskError> {
        let kind = self.kind();
        match self {
            Task::FormatRecord { request, format } => Ok(TaskOutput::Text(format.format(&request))),
            Task::Serialize(value) => serde_json::to_string(&value)
                .map(TaskOutput::Text)
                .map_err(|e| TaskError::failed(kind.to_string(), e.to_string())),
            Task::Compress { data, level } => codec::gzip(&data, level)
                .map(TaskOutput::Bytes)
                .map_err(|e| TaskError::failed(kind.to_string(), e.to_string())),
            Task::Decompress(data) => codec::gunzip(&data)
                .map(TaskOutput::Bytes)
                .map_err(|e| TaskError::failed(kind.to_string(), e.to_string())),
            Task::Custom { job, .. } => job().map_err(|e| TaskError::failed(kind.to_string(), e)),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::FormatRecord { format, .. } => {
                f.debug_struct("FormatRecord").field("format", format).finish()
            }
            Task::Serialize(_) => f.write_str("Serialize"),
            Task::Compress { data, level } => f
                .debug_struct("Compress")
                .field("bytes", &data.len())
                .field("level", level)
                .finish(),
            Task::Decompress(data) => f.debug_struct("Decompress").field("bytes", &data.len()).finish(),
            Task::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

/// Successful reply payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    Text(String),
    Bytes(Vec<u8>),
}

impl TaskOutput {
    fn variant(&self) -> &'static str {
        match self {
            TaskOutput::Text(_) => "text",
            TaskOutput::Bytes(_) => "bytes",
        }
    }

    pub fn into_text(self, kind: TaskKind) -> Result<String, TaskError> {
        match self {
            TaskOutput::Text(text) => Ok(text),
            other => Err(TaskError::UnexpectedOutput {
                kind: kind.to_string(),
                actual: other.variant().to_string(),
            }),
        }
    }

    pub fn into_bytes(self, kind: TaskKind) -> Result<Vec<u8>, TaskError> {
        match self {
            TaskOutput::Bytes(bytes) => Ok(bytes),
            other => Err(TaskError::UnexpectedOutput {
                kind: kind.to_string(),
                actual: other.variant().to_string(),
            }),
        }
    }
}

/// Execute a task, turning a panic into a failed reply
pub(crate) fn run_isolated(task: Task) -> Result<TaskOutput, TaskError> {
    let kind = task.kind();
    panic::catch_unwind(AssertUnwindSafe(|| task.execute())).unwrap_or_else(|payload| {
        Err(TaskError::Panicked {
            kind: kind.to_string(),
            message: panic_message(payload.as_ref()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LogLevel, LogRecord};

    #[test]
    fn test_serialize_is_canonical() {
        let value = serde_json::json!({"b": [1, {"z": true, "a": null}], "a": "x"});
        let out = Task::Serialize(value).execute().unwrap();
        assert_eq!(
            out,
            TaskOutput::Text(r#"{"a":"x","b":[1,{"a":null,"z":true}]}"#.to_string())
        );
    }

    #[test]
    fn test_format_record() {
        let record = LogRecord::new(LogLevel::Warn, "low disk");
        let task = Task::FormatRecord {
            request: FormatRequest::from_record(&record),
            format: RecordFormat::Logfmt,
        };
        let text = task.execute().unwrap().into_text(TaskKind::FormatRecord).unwrap();
        assert!(text.contains("level=WARN"));
    }

    #[test]
    fn test_compress_then_decompress() {
        let data = b"abcabcabcabcabcabcabcabc".to_vec();
        let compressed = Task::Compress {
            data: data.clone(),
            level: 9,
        }
        .execute()
        .unwrap()
        .into_bytes(TaskKind::Compress)
        .unwrap();

        let restored = Task::Decompress(compressed).execute().unwrap();
        assert_eq!(restored, TaskOutput::Bytes(data));
    }

    #[test]
    fn test_failures_and_panics_become_replies() {
        let failed = run_isolated(Task::Decompress(b"nope".to_vec())).unwrap_err();
        assert!(matches!(failed, TaskError::Failed { ref kind, .. } if kind == "decompress"));

        let panicked = run_isolated(Task::custom("explode", || panic!("worker bug"))).unwrap_err();
        assert_eq!(
            panicked,
            TaskError::Panicked {
                kind: "explode".to_string(),
                message: "worker bug".to_string(),
            }
        );
    }

    #[test]
    fn test_unexpected_output() {
        let err = TaskOutput::Text("x".to_string())
            .into_bytes(TaskKind::Compress)
            .unwrap_err();
        assert!(matches!(err, TaskError::UnexpectedOutput { .. }));
    }
}
