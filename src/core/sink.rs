//! Sink trait for log output destinations

use super::{
    error::Result,
    log_level::HandlerClass,
    log_record::{CapturedTrace, LogRecord},
};

/// A drained record on its way to one sink
#[derive(Debug, Clone, Copy)]
pub struct Dispatch<'a> {
    pub record: &'a LogRecord,
    /// Display line produced by the worker pool, when pre-formatting is on
    pub formatted: Option<&'a str>,
}

/// Destination for drained records
///
/// Handlers take `&self`: the pipeline may call one sink from the drain
/// thread and from a flushing caller at the same time.
///
/// # Example
///
/// ```
/// use log_pipeline::core::{CapturedTrace, Dispatch, Result, Sink};
///
/// struct Stdout;
///
/// impl Sink for Stdout {
///     fn on_debug(&self, dispatch: &Dispatch<'_>) -> Result<()> {
///         println!("{}", dispatch.record.message);
///         Ok(())
///     }
///
///     fn on_warning(&self, dispatch: &Dispatch<'_>) -> Result<()> {
///         self.on_debug(dispatch)
///     }
///
///     fn on_error(&self, dispatch: &Dispatch<'_>, _trace: Option<&CapturedTrace>) -> Result<()> {
///         eprintln!("{}", dispatch.record.message);
///         Ok(())
///     }
///
///     fn on_fatal(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
///         self.on_error(dispatch, trace)
///     }
///
///     fn name(&self) -> &str {
///         "stdout"
///     }
/// }
/// ```
pub trait Sink: Send + Sync {
    /// Trace, debug and info records
    fn on_debug(&self, dispatch: &Dispatch<'_>) -> Result<()>;

    fn on_warning(&self, dispatch: &Dispatch<'_>) -> Result<()>;

    fn on_error(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()>;

    fn on_fatal(&self, dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Route a dispatch to the handler matching its record's level
pub fn deliver(sink: &dyn Sink, dispatch: &Dispatch<'_>) -> Result<()> {
    match dispatch.record.level.handler_class() {
        HandlerClass::Debug => sink.on_debug(dispatch),
        HandlerClass::Warning => sink.on_warning(dispatch),
        HandlerClass::Error => {
            let trace = dispatch.record.handler_trace();
            sink.on_error(dispatch, trace.as_ref())
        }
        HandlerClass::Fatal => {
            let trace = dispatch.record.handler_trace();
            sink.on_fatal(dispatch, trace.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogLevel;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, bool)>>,
    }

    impl Sink for Recorder {
        fn on_debug(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
            self.calls.lock().push(("debug", false));
            Ok(())
        }

        fn on_warning(&self, _dispatch: &Dispatch<'_>) -> Result<()> {
            self.calls.lock().push(("warning", false));
            Ok(())
        }

        fn on_error(&self, _dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
            self.calls.lock().push(("error", trace.is_some()));
            Ok(())
        }

        fn on_fatal(&self, _dispatch: &Dispatch<'_>, trace: Option<&CapturedTrace>) -> Result<()> {
            self.calls.lock().push(("fatal", trace.is_some()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    #[test]
    fn test_deliver_routes_by_level() {
        let sink = Recorder::default();
        let traced = CapturedTrace::from_frames(["frame"]);

        for record in [
            LogRecord::new(LogLevel::Trace, "t"),
            LogRecord::new(LogLevel::Info, "i"),
            LogRecord::new(LogLevel::Warn, "w"),
            LogRecord::new(LogLevel::Error, "e").with_trace(traced.clone()),
            LogRecord::new(LogLevel::Fatal, "f"),
        ] {
            let dispatch = Dispatch {
                record: &record,
                formatted: None,
            };
            deliver(&sink, &dispatch).unwrap();
        }

        assert_eq!(
            *sink.calls.lock(),
            vec![
                ("debug", false),
                ("debug", false),
                ("warning", false),
                ("error", true),
                ("fatal", false),
            ]
        );
    }
}
