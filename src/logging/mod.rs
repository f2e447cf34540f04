//! Structured application logging.
//!
//! ```rust
//! use rapport::logging::{LogService, MemorySink};
//! use serde_json::json;
//!
//! let sink = MemorySink::new();
//! let logs = LogService::builder().sink(sink.clone()).build();
//!
//! let logger = logs.logger("matching");
//! logger.info("candidates ranked", json!({ "count": 12 }));
//! ```
//!
//! Every record carries its level, message, the logger's service tag, a call
//! time timestamp and free-form JSON metadata. Logging never fails from the
//! caller's point of view.
//!
//! Framework internals (listener, shutdown, connection errors) log through
//! `tracing` instead; this module is for application records.

mod record;
mod service;
mod sink;

use std::sync::Arc;

use serde_json::Value;

pub use record::{LogLevel, LogRecord, Metadata};
pub use service::{LogService, LogServiceBuilder};
pub use sink::{ConsoleSink, FileSink, MemorySink, Sink};

use crate::error::AppError;
use record::into_metadata;

/// A logger bound to one service tag.
///
/// Cheap to clone; all clones write to the same [`LogService`].
#[derive(Clone)]
pub struct Logger {
    service: Arc<str>,
    output: LogService,
}

impl Logger {
    pub(crate) fn new(service: &str, output: LogService) -> Self {
        Self { service: Arc::from(service), output }
    }

    pub fn service(&self) -> &str { &self.service }

    pub fn error(&self, message: impl Into<String>, metadata: Value) {
        self.log(LogLevel::Error, message.into(), None, metadata);
    }

    pub fn warn(&self, message: impl Into<String>, metadata: Value) {
        self.log(LogLevel::Warn, message.into(), None, metadata);
    }

    pub fn info(&self, message: impl Into<String>, metadata: Value) {
        self.log(LogLevel::Info, message.into(), None, metadata);
    }

    pub fn debug(&self, message: impl Into<String>, metadata: Value) {
        self.log(LogLevel::Debug, message.into(), None, metadata);
    }

    /// Logs at `error` level with `err`'s stack as the record's own `stack`
    /// field.
    pub fn error_with(&self, message: impl Into<String>, err: &AppError, metadata: Value) {
        self.log(LogLevel::Error, message.into(), err.stack().map(str::to_owned), metadata);
    }

    fn log(&self, level: LogLevel, message: String, stack: Option<String>, metadata: Value) {
        if !self.output.enabled(level) {
            return;
        }
        let record = LogRecord::now(level, &self.service, message, stack, into_metadata(metadata));
        self.output.dispatch(&record);
    }
}
