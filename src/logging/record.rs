//! The structured log record and its severity levels.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};

/// Arbitrary structured key/value payload attached to a record.
///
/// Insertion order is preserved (`serde_json`'s `preserve_order` feature), so
/// records read back in the order the caller wrote them.
pub type Metadata = Map<String, Value>;

/// Record severity, most severe first.
///
/// The derived ordering is what the level threshold compares against:
/// a logger configured at `Info` emits `Error`, `Warn` and `Info`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn  => "warn",
            Self::Info  => "info",
            Self::Debug => "debug",
        }
    }

    /// ANSI colour used by the console sink.
    fn color(self) -> &'static str {
        match self {
            Self::Error => "\x1b[31m",
            Self::Warn  => "\x1b[33m",
            Self::Info  => "\x1b[32m",
            Self::Debug => "\x1b[34m",
        }
    }
}

/// Case-insensitive: `"INFO"`, `"info"` and `"Info"` all parse.
impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured, timestamped log entry.
///
/// Records are built by [`Logger`](super::Logger) at call time and handed to
/// every sink by shared reference; nothing mutates them afterwards.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub service: String,
    /// `YYYY-MM-DD HH:mm:ss`, UTC.
    pub timestamp: String,
    /// Stack trace of an error payload, kept apart from `message`.
    pub stack: Option<String>,
    pub metadata: Metadata,
}

/// Fields every record carries; metadata keys with these names are dropped
/// from the flattened JSON form rather than shadowing them.
const RESERVED: [&str; 5] = ["level", "message", "service", "timestamp", "stack"];

impl LogRecord {
    pub(crate) fn now(
        level: LogLevel,
        service: &str,
        message: String,
        stack: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            level,
            message,
            service: service.to_owned(),
            timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            stack,
            metadata,
        }
    }

    /// The flattened JSON object written by the file sinks:
    /// `{level, message, service, timestamp, stack?, ...metadata}`.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("level".into(), Value::from(self.level.as_str()));
        obj.insert("message".into(), Value::from(self.message.as_str()));
        obj.insert("service".into(), Value::from(self.service.as_str()));
        obj.insert("timestamp".into(), Value::from(self.timestamp.as_str()));
        if let Some(stack) = &self.stack {
            obj.insert("stack".into(), Value::from(stack.as_str()));
        }
        for (k, v) in &self.metadata {
            if !RESERVED.contains(&k.as_str()) {
                obj.insert(k.clone(), v.clone());
            }
        }
        Value::Object(obj)
    }

    /// One JSON line, newline-terminated.
    pub fn to_json_line(&self) -> String {
        let mut line = self.to_json().to_string();
        line.push('\n');
        line
    }

    /// Human-readable console form:
    ///
    /// ```text
    /// 2026-01-01 12:00:00 [info]: Incoming request
    /// {
    ///   "method": "GET"
    /// }
    /// ```
    pub fn to_console_line(&self, colorize: bool) -> String {
        let level = if colorize {
            format!("{}{}\x1b[39m", self.level.color(), self.level)
        } else {
            self.level.to_string()
        };
        let mut out = format!("{} [{level}]: {}", self.timestamp, self.message);
        if let Some(stack) = &self.stack {
            out.push('\n');
            out.push_str(stack);
        }
        let mut meta = self.metadata.clone();
        meta.insert("service".into(), Value::from(self.service.as_str()));
        if let Ok(pretty) = serde_json::to_string_pretty(&meta) {
            out.push('\n');
            out.push_str(&pretty);
        }
        out.push('\n');
        out
    }
}

/// Turns a caller-supplied JSON value into record metadata.
///
/// Objects are used as-is, `null` means "no metadata", anything else is kept
/// under a `value` key.
pub(crate) fn into_metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        Value::Null => Metadata::new(),
        other => {
            let mut map = Metadata::new();
            map.insert("value".into(), other);
            map
        }
    }
}
