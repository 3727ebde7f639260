//! Sink implementations

#[cfg(feature = "console")]
pub mod console;

#[cfg(feature = "console")]
pub use console::ConsoleSink;

pub use crate::core::Sink;
