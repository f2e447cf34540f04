//! Error types.
//!
//! Two kinds of failure live here and they never mix:
//!
//! - [`Error`]: infrastructure failures: binding a port, creating the log
//!   directory, reading configuration. Returned from startup functions.
//! - [`AppError`]: a failure that must surface to the HTTP client with a
//!   specific status code. Created at the failure site, carried unchanged
//!   through the middleware chain, turned into a JSON envelope by the
//!   [error handler](crate::middleware::ErrorHandler).

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::panic::PanicHookInfo;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// The error type returned by rapport's fallible startup operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("logging: {0}")]
    Logging(String),
}

/// A normalized application failure.
///
/// `AppError` does not implement [`std::error::Error`]; the blanket
/// `From<E: std::error::Error>` conversion depends on that, and it is what
/// lets `?` work on any error inside a handler returning `Result<_, AppError>`.
///
/// ```rust
/// use rapport::{AppError, create_error};
///
/// let forbidden = create_error("forbidden", 403, true);
/// assert_eq!(forbidden.status_code(), Some(403));
///
/// let plain = AppError::new("boom");
/// assert_eq!(plain.status_code(), None); // resolved to 500 by the handler
/// ```
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    is_operational: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl AppError {
    /// An error without a status code. The error handler answers it with 500.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            is_operational: true,
            stack: capture_stack(),
        }
    }

    /// Builds the 404 error for a request that matched no route.
    pub fn not_found(method: &str, original_url: &str) -> Self {
        create_error(format!("Route {method} {original_url} not found"), 404, true)
    }

    /// Converts a panic payload caught while running a handler.
    ///
    /// Panics are programming faults, so the result is not operational. The
    /// stack is the one recorded at the panic site on this thread, when the
    /// panic hook installed by [`App::new`](crate::App::new) saw it.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self {
            message,
            status_code: None,
            is_operational: false,
            stack: PANIC_STACK.with(|slot| slot.borrow_mut().take()),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn message(&self) -> &str { &self.message }
    pub fn status_code(&self) -> Option<u16> { self.status_code }
    pub fn is_operational(&self) -> bool { self.is_operational }
    pub fn stack(&self) -> Option<&str> { self.stack.as_deref() }
}

/// Constructs a tagged application error.
///
/// The conventional defaults are `status_code = 500` and
/// `is_operational = true`; pass them explicitly.
pub fn create_error(message: impl Into<String>, status_code: u16, is_operational: bool) -> AppError {
    AppError {
        message: message.into(),
        status_code: Some(status_code),
        is_operational,
        stack: capture_stack(),
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl<E> From<E> for AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self::new(e.to_string())
    }
}

static FORCE_STACKS: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Backtrace of the last panic on this thread.
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Makes every new [`AppError`] carry a stack, whatever `RUST_BACKTRACE` says.
/// Turned on by an [`ErrorHandler`](crate::middleware::ErrorHandler) in
/// diagnostic mode.
pub(crate) fn force_stacks() {
    FORCE_STACKS.store(true, Ordering::Relaxed);
}

/// Installs, once per process, a panic hook that keeps the panic-site
/// backtrace for [`AppError::from_panic`]. The previous hook still runs.
pub(crate) fn record_panic_stacks() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            let stack = Backtrace::force_capture().to_string();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Populated when diagnostics force it, or when `RUST_BACKTRACE` /
/// `RUST_LIB_BACKTRACE` enable capture.
fn capture_stack() -> Option<String> {
    if FORCE_STACKS.load(Ordering::Relaxed) {
        return Some(Backtrace::force_capture().to_string());
    }
    let bt = Backtrace::capture();
    match bt.status() {
        BacktraceStatus::Captured => Some(bt.to_string()),
        _ => None,
    }
}
