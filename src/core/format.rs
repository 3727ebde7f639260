//! Display formats for drained records
//!
//! Provides different renderings of a record:
//! - Text: Human-readable format (default)
//! - Json: Machine-readable JSON format
//! - Logfmt: Key-value format compatible with log aggregation tools

use super::log_context::{FieldValue, LogContext};
use super::log_level::LogLevel;
use super::log_record::LogRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Output format for records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// Example: `[2025-01-08T10:30:45.123Z] [INFO ] Request processed`
    #[default]
    Text,

    /// Example: `{"level":"INFO","message":"Request processed","timestamp":"2025-01-08T10:30:45.123Z"}`
    Json,

    /// Example: `timestamp=2025-01-08T10:30:45.123Z level=INFO message="Request processed"`
    Logfmt,
}

/// Owned snapshot of the parts of a record a formatter reads
///
/// Built on the producer side so that it can cross into a worker without
/// sharing the record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRequest {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub event: Option<String>,
    pub context: Option<LogContext>,
}

impl FormatRequest {
    pub fn from_record(record: &LogRecord) -> Self {
        Self {
            level: record.level,
            message: record.message.summary().into_owned(),
            timestamp: record.timestamp,
            event: record.event.as_ref().map(|e| e.name.clone()),
            context: record.context.clone(),
        }
    }

    fn timestamp_str(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl RecordFormat {
    pub fn format(&self, request: &FormatRequest) -> String {
        match self {
            RecordFormat::Text => format_text(request),
            RecordFormat::Json => format_json(request),
            RecordFormat::Logfmt => format_logfmt(request),
        }
    }

    /// Format a record directly, without going through a worker
    pub fn format_record(&self, record: &LogRecord) -> String {
        self.format(&FormatRequest::from_record(record))
    }
}

fn format_text(request: &FormatRequest) -> String {
    let mut line = format!(
        "[{}] [{:5}] {}",
        request.timestamp_str(),
        request.level.to_str(),
        request.message
    );

    if let Some(ref event) = request.event {
        line.push_str(" event=");
        line.push_str(event);
    }

    if let Some(ref context) = request.context {
        if !context.is_empty() {
            line.push(' ');
            line.push_str(&context.format_fields());
        }
    }

    line
}

fn format_json(request: &FormatRequest) -> String {
    let mut json_obj = serde_json::Map::new();

    json_obj.insert(
        "timestamp".to_string(),
        serde_json::Value::String(request.timestamp_str()),
    );
    json_obj.insert(
        "level".to_string(),
        serde_json::Value::String(request.level.to_str().to_string()),
    );
    json_obj.insert(
        "message".to_string(),
        serde_json::Value::String(request.message.clone()),
    );
    if let Some(ref event) = request.event {
        json_obj.insert("event".to_string(), serde_json::Value::String(event.clone()));
    }

    // Context fields never overwrite the reserved keys above
    if let Some(ref context) = request.context {
        for (key, value) in context.fields() {
            json_obj
                .entry(key.clone())
                .or_insert_with(|| value.to_json_value());
        }
    }

    serde_json::to_string(&serde_json::Value::Object(json_obj)).unwrap_or_default()
}

fn format_logfmt(request: &FormatRequest) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "timestamp={}",
        escape_logfmt_value(&request.timestamp_str())
    ));
    parts.push(format!("level={}", request.level.to_str()));
    parts.push(format!("message={}", quote_logfmt_value(&request.message)));

    if let Some(ref event) = request.event {
        parts.push(format!("event={}", escape_logfmt_value(event)));
    }

    if let Some(ref context) = request.context {
        for (key, value) in context.fields() {
            let formatted_value = match value {
                FieldValue::String(s) => quote_logfmt_value(s),
                FieldValue::Int(i) => i.to_string(),
                FieldValue::Float(f) => f.to_string(),
                FieldValue::Bool(b) => b.to_string(),
                FieldValue::Null => "null".to_string(),
            };
            parts.push(format!("{}={}", escape_logfmt_key(key), formatted_value));
        }
    }

    parts.join(" ")
}

/// Escape a logfmt key (remove spaces and special chars)
fn escape_logfmt_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Escape a logfmt value (quote if contains spaces)
fn escape_logfmt_value(value: &str) -> String {
    if value.contains(' ') || value.contains('"') || value.contains('=') {
        quote_logfmt_value(value)
    } else {
        value.to_string()
    }
}

fn quote_logfmt_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;
    use chrono::TimeZone;

    fn request(level: LogLevel, message: &str) -> FormatRequest {
        let record = LogRecord::new(level, message)
            .with_timestamp(Utc.with_ymd_and_hms(2025, 1, 8, 10, 30, 45).unwrap());
        FormatRequest::from_record(&record)
    }

    #[test]
    fn test_text_format() {
        let result = RecordFormat::Text.format(&request(LogLevel::Info, "Test message"));
        assert_eq!(result, "[2025-01-08T10:30:45.000Z] [INFO ] Test message");
    }

    #[test]
    fn test_text_format_with_context_and_event() {
        let record = LogRecord::new(LogLevel::Info, "User logged in")
            .with_event(Event::new("login"))
            .with_context(
                LogContext::new()
                    .with_field("user_id", 123)
                    .with_field("action", "login"),
            );

        let result = RecordFormat::Text.format_record(&record);
        assert!(result.contains("User logged in event=login"));
        assert!(result.ends_with("action=login user_id=123"));
    }

    #[test]
    fn test_json_format() {
        let mut req = request(LogLevel::Error, "Error occurred");
        req.context = Some(
            LogContext::new()
                .with_field("request_id", "abc-123")
                .with_field("level", "spoofed"),
        );

        let parsed: serde_json::Value =
            serde_json::from_str(&RecordFormat::Json.format(&req)).unwrap();
        assert_eq!(parsed["level"], "ERROR");
        assert_eq!(parsed["message"], "Error occurred");
        assert_eq!(parsed["request_id"], "abc-123");
        assert_eq!(parsed["timestamp"], "2025-01-08T10:30:45.000Z");
    }

    #[test]
    fn test_logfmt_format() {
        let mut req = request(LogLevel::Warn, "Warning message");
        req.context = Some(
            LogContext::new()
                .with_field("query", "SELECT * FROM users WHERE id=1")
                .with_field("count", 5),
        );

        let result = RecordFormat::Logfmt.format(&req);
        assert!(result.contains("level=WARN"));
        assert!(result.contains("message=\"Warning message\""));
        assert!(result.contains("query=\"SELECT * FROM users WHERE id=1\""));
        assert!(result.contains("count=5"));
    }

    #[test]
    fn test_structured_message_is_rendered_as_json() {
        let mut map = serde_json::Map::new();
        map.insert("user".to_string(), serde_json::json!("alice"));
        let record = LogRecord::new(LogLevel::Info, map);

        assert_eq!(FormatRequest::from_record(&record).message, r#"{"user":"alice"}"#);
    }
}
