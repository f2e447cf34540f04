//! Log sinks: where records end up.
//!
//! A sink accepts a [`LogRecord`] and records it best-effort. Write errors
//! are returned to [`LogService`](super::LogService), which discards them:
//! a broken sink never fails the request that logged.
//!
//! The console and file sinks hand each record to a `tracing-appender`
//! worker thread as one contiguous buffer. The request path never waits on
//! I/O, and two records written concurrently can never interleave.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use super::record::{LogLevel, LogRecord};
use crate::error::Error;

/// Destination for log records.
pub trait Sink: Send + Sync + 'static {
    /// Whether this sink wants `record`. Defaults to everything.
    fn accepts(&self, record: &LogRecord) -> bool {
        let _ = record;
        true
    }

    fn write(&self, record: &LogRecord) -> io::Result<()>;
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Human-readable, optionally colourized output on stdout.
pub struct ConsoleSink {
    writer: NonBlocking,
    colorize: bool,
}

impl ConsoleSink {
    /// Returns the sink and the guard that flushes it on drop.
    pub fn stdout(colorize: bool) -> (Self, WorkerGuard) {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());
        (Self { writer, colorize }, guard)
    }
}

impl Sink for ConsoleSink {
    fn write(&self, record: &LogRecord) -> io::Result<()> {
        let mut w = self.writer.clone();
        w.write_all(record.to_console_line(self.colorize).as_bytes())
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

/// JSON-lines file, optionally restricted to records at or above a severity.
pub struct FileSink {
    writer: NonBlocking,
    max_level: LogLevel,
}

impl FileSink {
    /// Opens `<dir>/<name>.log`, rotated per `rotation`, keeping at most
    /// `max_files` rotated files. Only records at least as severe as
    /// `max_level` are accepted.
    pub fn open(
        dir: &Path,
        name: &str,
        rotation: Rotation,
        max_files: usize,
        max_level: LogLevel,
    ) -> Result<(Self, WorkerGuard), Error> {
        let appender = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(name)
            .filename_suffix("log")
            .max_log_files(max_files.max(1))
            .build(dir)
            .map_err(|e| Error::Logging(format!("cannot open {name}.log in {}: {e}", dir.display())))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Ok((Self { writer, max_level }, guard))
    }
}

impl Sink for FileSink {
    fn accepts(&self, record: &LogRecord) -> bool {
        record.level <= self.max_level
    }

    fn write(&self, record: &LogRecord) -> io::Result<()> {
        let mut w = self.writer.clone();
        w.write_all(record.to_json_line().as_bytes())
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Keeps every record in memory. Clones share the same buffer.
///
/// Meant for tests that assert on what was logged:
///
/// ```rust
/// use rapport::logging::{LogService, MemorySink};
/// use serde_json::json;
///
/// let sink = MemorySink::new();
/// let service = LogService::builder().sink(sink.clone()).build();
/// service.logger("users").info("created", json!({ "id": 7 }));
///
/// let records = sink.records();
/// assert_eq!(records[0].service, "users");
/// assert_eq!(records[0].metadata["id"], 7);
/// ```
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<LogRecord> {
        self.records.lock().iter().filter(|r| r.message == message).cloned().collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Sink for MemorySink {
    fn write(&self, record: &LogRecord) -> io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::record::Metadata;

    #[test]
    fn file_sink_filters_by_severity() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _guard) =
            FileSink::open(dir.path(), "error", Rotation::NEVER, 5, LogLevel::Error).unwrap();

        let err = LogRecord::now(LogLevel::Error, "t", "bad".into(), None, Metadata::new());
        let info = LogRecord::now(LogLevel::Info, "t", "fine".into(), None, Metadata::new());
        assert!(sink.accepts(&err));
        assert!(!sink.accepts(&info));
    }

    #[test]
    fn file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (sink, _guard) =
                FileSink::open(dir.path(), "combined", Rotation::NEVER, 5, LogLevel::Debug).unwrap();
            let r = LogRecord::now(LogLevel::Info, "t", "one".into(), None, Metadata::new());
            sink.write(&r).unwrap();
            sink.write(&r).unwrap();
            // dropping the guard flushes the worker
        }
        let text = std::fs::read_to_string(dir.path().join("combined.log")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["message"], "one");
    }

    #[test]
    fn memory_sink_clones_share_storage() {
        let a = MemorySink::new();
        let b = a.clone();
        let r = LogRecord::now(LogLevel::Warn, "t", "w".into(), None, Metadata::new());
        a.write(&r).unwrap();
        assert_eq!(b.records().len(), 1);
        b.clear();
        assert!(a.records().is_empty());
    }
}
