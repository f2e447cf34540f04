//! The process-lifetime diagnostic-output service.

use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing_appender::non_blocking::WorkerGuard;

use super::Logger;
use super::record::{LogLevel, LogRecord, Metadata, into_metadata};
use super::sink::{ConsoleSink, FileSink, Sink};
use crate::config::LogConfig;
use crate::error::Error;

/// Owns every sink and hands out [`Logger`]s.
///
/// Create one at process start with [`LogService::init`], pass clones to
/// whatever needs to log, and call [`LogService::shutdown`] before exit so the
/// background writers flush.
///
/// Besides the regular sinks it owns two special destinations:
///
/// - **exceptions**: panics anywhere in the process, captured through a
///   panic hook installed by `init`;
/// - **rejections**: background tasks that failed without anyone observing
///   the failure, reported by the server via [`LogService::report_rejection`].
#[derive(Clone)]
pub struct LogService {
    inner: Arc<Inner>,
}

struct Inner {
    threshold: LogLevel,
    sinks: Vec<Box<dyn Sink>>,
    exceptions: Vec<Box<dyn Sink>>,
    rejections: Vec<Box<dyn Sink>>,
    capture_panics: bool,
    /// Cleared by `shutdown`; the hook then only forwards to the previous one.
    hook_active: AtomicBool,
    guards: Mutex<Vec<WorkerGuard>>,
}

impl LogService {
    /// Builds the sinks described by `config` and installs the panic hook.
    ///
    /// File sinks (`error.log`, `combined.log`, `exceptions.log`,
    /// `rejections.log`) are created under `config.directory`, which is
    /// created if missing.
    pub fn init(config: &LogConfig) -> Result<Self, Error> {
        let mut builder = Self::builder().level(config.level).capture_panics(true);

        if config.console {
            let (sink, guard) = ConsoleSink::stdout(config.colorize);
            builder = builder.sink(sink).guard(guard);
        }

        if config.files {
            std::fs::create_dir_all(&config.directory)?;
            let dir = config.directory.as_path();
            let (rot, keep) = (config.rotation.as_rotation(), config.max_files);

            let (error, g1) = FileSink::open(dir, "error", rot.clone(), keep, LogLevel::Error)?;
            let (combined, g2) = FileSink::open(dir, "combined", rot.clone(), keep, LogLevel::Debug)?;
            let (exceptions, g3) = FileSink::open(dir, "exceptions", rot.clone(), keep, LogLevel::Debug)?;
            let (rejections, g4) = FileSink::open(dir, "rejections", rot, keep, LogLevel::Debug)?;

            builder = builder
                .sink(error)
                .sink(combined)
                .exception_sink(exceptions)
                .rejection_sink(rejections)
                .guard(g1)
                .guard(g2)
                .guard(g3)
                .guard(g4);
        }

        Ok(builder.build())
    }

    /// A service with no sinks at all. Loggers created from it are no-ops.
    pub fn disabled() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> LogServiceBuilder {
        LogServiceBuilder {
            threshold: LogLevel::Info,
            sinks: Vec::new(),
            exceptions: Vec::new(),
            rejections: Vec::new(),
            capture_panics: false,
            guards: Vec::new(),
        }
    }

    /// Creates a logger whose records all carry `service` as their service tag.
    ///
    /// An empty name is replaced by `"default"`.
    pub fn logger(&self, service: &str) -> Logger {
        let service = if service.trim().is_empty() { "default" } else { service };
        Logger::new(service, self.clone())
    }

    pub fn level(&self) -> LogLevel {
        self.inner.threshold
    }

    pub(crate) fn enabled(&self, level: LogLevel) -> bool {
        level <= self.inner.threshold
    }

    pub(crate) fn dispatch(&self, record: &LogRecord) {
        fan_out(&self.inner.sinks, record);
    }

    /// Records a background failure nobody awaited, e.g. a connection task
    /// that panicked.
    pub fn report_rejection(&self, reason: &str, metadata: Value) {
        let record = LogRecord::now(
            LogLevel::Error,
            "process",
            format!("unhandled rejection: {reason}"),
            None,
            into_metadata(metadata),
        );
        fan_out(&self.inner.rejections, &record);
    }

    /// Flushes the background writers and stops feeding panics to the
    /// exception sinks.
    ///
    /// The panic hook stays installed as a pass-through, so hooks installed
    /// before or after `init` keep running. Loggers that outlive the call keep
    /// working against sinks without a flushing worker; their records may be
    /// dropped.
    pub fn shutdown(self) {
        self.inner.hook_active.store(false, Ordering::Release);
        self.inner.guards.lock().clear();
    }
}

fn fan_out(sinks: &[Box<dyn Sink>], record: &LogRecord) {
    for sink in sinks {
        if sink.accepts(record) {
            // Best effort: a broken sink must not reach the caller.
            let _ = sink.write(record);
        }
    }
}

fn install_panic_hook(inner: Weak<Inner>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        if let Some(inner) = inner.upgrade().filter(|inner| inner.hook_active.load(Ordering::Acquire)) {
            fan_out(&inner.exceptions, &panic_record(info));
        }
        previous(info);
    }));
}

fn panic_record(info: &PanicHookInfo<'_>) -> LogRecord {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_owned());
    let location = info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
    let thread = std::thread::current().name().map(str::to_owned);

    let mut metadata = Metadata::new();
    metadata.insert("location".into(), json!(location));
    metadata.insert("thread".into(), json!(thread));

    LogRecord::now(
        LogLevel::Error,
        "process",
        format!("uncaught exception: {message}"),
        Some(Backtrace::force_capture().to_string()),
        metadata,
    )
}

/// Assembles a [`LogService`] by hand. [`LogService::init`] uses it with the
/// sinks from configuration; tests use it with a
/// [`MemorySink`](super::MemorySink).
pub struct LogServiceBuilder {
    threshold: LogLevel,
    sinks: Vec<Box<dyn Sink>>,
    exceptions: Vec<Box<dyn Sink>>,
    rejections: Vec<Box<dyn Sink>>,
    capture_panics: bool,
    guards: Vec<WorkerGuard>,
}

impl LogServiceBuilder {
    /// Least severe level that still gets recorded. Defaults to `Info`.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.threshold = level;
        self
    }

    pub fn sink(mut self, sink: impl Sink) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn exception_sink(mut self, sink: impl Sink) -> Self {
        self.exceptions.push(Box::new(sink));
        self
    }

    pub fn rejection_sink(mut self, sink: impl Sink) -> Self {
        self.rejections.push(Box::new(sink));
        self
    }

    /// Install a process-wide panic hook feeding the exception sinks.
    pub fn capture_panics(mut self, yes: bool) -> Self {
        self.capture_panics = yes;
        self
    }

    /// Keeps a background-writer guard alive until shutdown.
    pub fn guard(mut self, guard: WorkerGuard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn build(self) -> LogService {
        let inner = Arc::new(Inner {
            threshold: self.threshold,
            sinks: self.sinks,
            exceptions: self.exceptions,
            rejections: self.rejections,
            capture_panics: self.capture_panics,
            hook_active: AtomicBool::new(self.capture_panics),
            guards: Mutex::new(self.guards),
        });
        if inner.capture_panics {
            install_panic_hook(Arc::downgrade(&inner));
        }
        LogService { inner }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::logging::MemorySink;

    struct Broken;

    impl Sink for Broken {
        fn write(&self, _: &LogRecord) -> std::io::Result<()> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    #[test]
    fn threshold_drops_less_severe_records() {
        let sink = MemorySink::new();
        let service = LogService::builder().level(LogLevel::Warn).sink(sink.clone()).build();
        let log = service.logger("t");
        log.debug("d", Value::Null);
        log.info("i", Value::Null);
        log.warn("w", Value::Null);
        log.error("e", Value::Null);
        let messages: Vec<_> = sink.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, ["w", "e"]);
    }

    #[test]
    fn failing_sink_does_not_stop_the_others() {
        let sink = MemorySink::new();
        let service = LogService::builder().sink(Broken).sink(sink.clone()).build();
        service.logger("t").info("still here", Value::Null);
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn rejections_go_only_to_rejection_sinks() {
        let regular = MemorySink::new();
        let rejections = MemorySink::new();
        let service = LogService::builder()
            .sink(regular.clone())
            .rejection_sink(rejections.clone())
            .build();
        service.report_rejection("task panicked", json!({ "peer": "127.0.0.1:9" }));

        assert!(regular.records().is_empty());
        let records = rejections.records();
        assert_eq!(records[0].message, "unhandled rejection: task panicked");
        assert_eq!(records[0].service, "process");
        assert_eq!(records[0].metadata["peer"], "127.0.0.1:9");
    }

    #[test]
    fn blank_service_name_falls_back_to_default() {
        let service = LogService::disabled();
        assert_eq!(service.logger("  ").service(), "default");
        assert_eq!(service.logger("app").service(), "app");
    }

    static OUTER_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn shutdown_keeps_earlier_panic_hooks() {
        let earlier = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            OUTER_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
            earlier(info);
        }));

        let exceptions = MemorySink::new();
        let service = LogService::builder()
            .exception_sink(exceptions.clone())
            .capture_panics(true)
            .build();

        let _ = std::panic::catch_unwind(|| panic!("while logging"));
        assert_eq!(exceptions.with_message("uncaught exception: while logging").len(), 1);

        service.shutdown();
        let calls = OUTER_HOOK_CALLS.load(Ordering::SeqCst);
        let _ = std::panic::catch_unwind(|| panic!("after shutdown"));

        assert!(OUTER_HOOK_CALLS.load(Ordering::SeqCst) > calls);
        assert!(exceptions.with_message("uncaught exception: after shutdown").is_empty());
    }

    #[test]
    fn init_creates_file_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            console: false,
            directory: dir.path().join("logs"),
            ..LogConfig::default()
        };
        let service = LogService::init(&config).unwrap();
        service.logger("t").error("written", Value::Null);
        service.shutdown();

        let error_log = std::fs::read_to_string(dir.path().join("logs/error.log")).unwrap();
        assert!(error_log.contains("\"written\""));
        let combined = std::fs::read_to_string(dir.path().join("logs/combined.log")).unwrap();
        assert!(combined.contains("\"written\""));
    }
}
