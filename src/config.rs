//! Process configuration from environment variables.
//!
//! `main` calls `dotenv::dotenv()` first, so a `.env` file in the working
//! directory is honoured. Every variable is optional:
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `3001` |
//! | `APP_ENV` | `development` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_DIR` | `logs` |
//! | `LOG_CONSOLE` / `LOG_FILES` | `true` |
//! | `LOG_ROTATION` | `never` |
//! | `LOG_MAX_FILES` | `5` |
//! | `BODY_LIMIT` | `10485760` |
//! | `TRUST_PROXY` | `false` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing_appender::rolling::Rotation;

use crate::error::Error;
use crate::logging::LogLevel;

/// Deployment environment. `Development` turns on diagnostic error bodies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production  => "production",
            Self::Test        => "test",
        }
    }

    /// Whether error responses may include stacks and raw error details.
    pub fn is_diagnostic(self) -> bool {
        self == Self::Development
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(Error::Config(format!("APP_ENV: unknown environment `{other}`"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often the log files roll over.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

impl LogRotation {
    pub(crate) fn as_rotation(self) -> Rotation {
        match self {
            Self::Never  => Rotation::NEVER,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily  => Rotation::DAILY,
        }
    }
}

impl FromStr for LogRotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(Error::Config(format!("LOG_ROTATION: unknown rotation `{other}`"))),
        }
    }
}

/// Sink configuration for [`LogService::init`](crate::logging::LogService::init).
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: LogLevel,
    pub console: bool,
    pub colorize: bool,
    pub files: bool,
    pub directory: PathBuf,
    pub rotation: LogRotation,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            colorize: true,
            files: true,
            directory: PathBuf::from("logs"),
            rotation: LogRotation::Never,
            max_files: 5,
        }
    }
}

/// Everything the backend binary reads at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub log: LogConfig,
    /// Largest accepted request body, in bytes.
    pub body_limit: usize,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3001,
            environment: Environment::Development,
            log: LogConfig::default(),
            body_limit: 10 * 1024 * 1024,
            trust_proxy: false,
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. `from_env` passes
    /// `std::env::var`; tests pass a map.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(env) = get("APP_ENV") {
            config.environment = env.parse()?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.log.level = level.parse().map_err(|e| Error::Config(format!("LOG_LEVEL: {e}")))?;
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log.directory = PathBuf::from(dir);
        }
        if let Some(v) = get("LOG_CONSOLE") {
            config.log.console = parse_bool("LOG_CONSOLE", &v)?;
        }
        if let Some(v) = get("LOG_FILES") {
            config.log.files = parse_bool("LOG_FILES", &v)?;
        }
        if let Some(v) = get("LOG_ROTATION") {
            config.log.rotation = v.parse()?;
        }
        if let Some(v) = get("LOG_MAX_FILES") {
            config.log.max_files = parse("LOG_MAX_FILES", &v)?;
        }
        if let Some(v) = get("BODY_LIMIT") {
            config.body_limit = parse("BODY_LIMIT", &v)?;
        }
        if let Some(v) = get("TRUST_PROXY") {
            config.trust_proxy = parse_bool("TRUST_PROXY", &v)?;
        }

        // Colour codes only make sense on an interactive console.
        config.log.colorize = config.environment != Environment::Production;

        Ok(config)
    }

    /// `host:port`, ready for [`Server::bind`](crate::Server::bind).
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, Error>
where
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e| Error::Config(format!("{key}: `{raw}`: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: `{raw}` is not a boolean"))),
    }
}
