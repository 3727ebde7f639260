//! Console sink implementation

use crate::core::{CapturedTrace, Dispatch, RecordFormat, Result, Sink};
use colored::Colorize;
use std::io::Write;

pub struct ConsoleSink {
    use_colors: bool,
    format: RecordFormat,
    show_traces: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            use_colors: true,
            format: RecordFormat::default(),
            show_traces: true,
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self {
            use_colors,
            ..Self::new()
        }
    }

    /// Set the format used when the pipeline did not pre-format the record
    ///
    /// # Example
    ///
    /// ```
    /// use log_pipeline::sinks::ConsoleSink;
    /// use log_pipeline::core::RecordFormat;
    ///
    /// let sink = ConsoleSink::new().with_format(RecordFormat::Json);
    /// ```
    #[must_use]
    pub fn with_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    /// Print captured trace frames under error and fatal records
    #[must_use]
    pub fn with_traces(mut self, show_traces: bool) -> Self {
        self.show_traces = show_traces;
        self
    }

    fn render(&self, dispatch: &Dispatch<'_>) -> String {
        if let Some(line) = dispatch.formatted {
            return line.to_string();
        }

        let record = dispatch.record;
        match self.format {
            RecordFormat::Text if self.use_colors => {
                let level = format!("{:5}", record.level.to_str())
                    .color(record.level.color_code())
                    .to_string();
                let mut line = format!(
                    "[{}] [{}] {}",
                    record
                        .timestamp
                        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    level,
                    record.message.summary()
                );
                if let Some(ref event) = record.event {
                    line.push_str(" event=");
                    line.push_str(&event.name);
                }
                if let Some(ref context) = record.context {
                    if !context.is_empty() {
                        line.push(' ');
                        line.push_str(&context.format_fields());
                    }
                }
                line
            }
            format => format.format_record(record),
        }
    }

    fn render_trace(&self, line: &mut String, trace: Option<&CapturedTrace>) {
        let Some(trace) = trace.filter(|t| self.show_traces && !t.is_empty()) else {
            return;
        };
        for frame in trace.frames() {
            line.push_str("\n    at ");
            line.push_str(frame);
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn on_debug(&self, dispatch: &Dispatch<'_>) -> Result<()> {
        println!("{}", self.render(dispatch));
        Ok(())
    }

    fn on_warning(&self, dispatch: &Dispatch<'_>) -> Result<()> {
        println!("{}", self.render(dispatch));
        Ok(())
    }

    fn on_error(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
        let mut output = self.render(dispatch);
        self.render_trace(&mut output, trace);
        eprintln!("{}", output);
        Ok(())
    }

    fn on_fatal(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
        self.on_error(dispatch, trace)
    }

    fn flush(&self) -> Result<()> {
        // Both streams are written to
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LogContext, LogLevel, LogRecord};
    use chrono::{TimeZone, Utc};

    fn record() -> LogRecord {
        LogRecord::new(LogLevel::Warn, "cache miss")
            .with_timestamp(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
            .with_context(LogContext::new().with_field("key", "user:42"))
    }

    #[test]
    fn test_prefers_preformatted_line() {
        let record = record();
        let sink = ConsoleSink::new();
        let dispatch = Dispatch {
            record: &record,
            formatted: Some("already rendered"),
        };
        assert_eq!(sink.render(&dispatch), "already rendered");
    }

    #[test]
    fn test_plain_text_matches_record_format() {
        let record = record();
        let sink = ConsoleSink::with_colors(false);
        let dispatch = Dispatch {
            record: &record,
            formatted: None,
        };
        assert_eq!(
            sink.render(&dispatch),
            RecordFormat::Text.format_record(&record)
        );
    }

    #[test]
    fn test_json_format() {
        let record = record();
        let sink = ConsoleSink::new().with_format(RecordFormat::Json);
        let dispatch = Dispatch {
            record: &record,
            formatted: None,
        };
        let value: serde_json::Value = serde_json::from_str(&sink.render(&dispatch)).unwrap();
        assert_eq!(value["message"], "cache miss");
        assert_eq!(value["key"], "user:42");
    }

    #[test]
    fn test_trace_frames_are_appended() {
        let sink = ConsoleSink::with_colors(false);
        let mut line = String::from("boom");
        let trace = CapturedTrace::from_frames(["main", "handler"]);
        sink.render_trace(&mut line, Some(&trace));
        assert_eq!(line, "boom\n    at main\n    at handler");

        let quiet = ConsoleSink::with_colors(false).with_traces(false);
        let mut line = String::from("boom");
        quiet.render_trace(&mut line, Some(&trace));
        assert_eq!(line, "boom");
    }

    #[test]
    fn test_handlers_succeed() {
        let record = record();
        let sink = ConsoleSink::with_colors(false);
        let dispatch = Dispatch {
            record: &record,
            formatted: None,
        };
        assert!(sink.on_warning(&dispatch).is_ok());
        assert!(sink.on_error(&dispatch, None).is_ok());
        assert!(sink.flush().is_ok());
    }
}
