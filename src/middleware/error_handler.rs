//! Terminal error handling: every failure leaves the server as the same JSON
//! envelope.

use chrono::{SecondsFormat, Utc};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::AppError;
use crate::logging::Logger;
use crate::request::Request;
use crate::response::Response;

/// The end of the chain for failed requests.
///
/// Receives the error and the request it belongs to and must produce the
/// final response; there is nothing after it. Closures
/// `Fn(AppError, &Request) -> Response` implement it too.
pub trait HandleError: Send + Sync + 'static {
    fn handle(&self, error: AppError, req: &Request) -> Response;
}

impl<F> HandleError for F
where
    F: Fn(AppError, &Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, error: AppError, req: &Request) -> Response {
        self(error, req)
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
    /// ISO-8601, taken when the response is built.
    pub timestamp: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Default [`HandleError`]: logs the failure with full request context and
/// answers
///
/// ```json
/// { "success": false,
///   "error": { "message": "...", "stack": "...", "details": { } },
///   "timestamp": "2026-01-01T12:00:00.000Z",
///   "path": "/the/path" }
/// ```
///
/// `stack` and `details` appear only when `diagnostics` is on. Turning it on
/// also makes every [`AppError`] created afterwards capture its stack, even
/// without `RUST_BACKTRACE`.
pub struct ErrorHandler {
    logger: Logger,
    diagnostics: bool,
}

const FALLBACK_MESSAGE: &str = "Internal Server Error";

impl ErrorHandler {
    pub fn new(logger: Logger, diagnostics: bool) -> Self {
        if diagnostics {
            crate::error::force_stacks();
        }
        Self { logger, diagnostics }
    }

    /// The error's own status when it has a valid one, 500 otherwise.
    pub fn resolve_status(error: &AppError) -> StatusCode {
        error
            .status_code()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The error's message, or `Internal Server Error` when it is empty.
    pub fn resolve_message(error: &AppError) -> &str {
        match error.message() {
            "" => FALLBACK_MESSAGE,
            message => message,
        }
    }

    pub fn envelope(&self, error: &AppError, req: &Request) -> ErrorEnvelope {
        let (stack, details) = if self.diagnostics {
            (error.stack().map(str::to_owned), serde_json::to_value(error).ok())
        } else {
            (None, None)
        };
        ErrorEnvelope {
            success: false,
            error: ErrorBody { message: Self::resolve_message(error).to_owned(), stack, details },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path: req.path().to_owned(),
        }
    }

    fn log(&self, error: &AppError, status: StatusCode, req: &Request) {
        self.logger.error_with(
            "Error occurred:",
            error,
            json!({
                "error": {
                    "message": error.message(),
                    "stack": error.stack(),
                    "statusCode": status.as_u16(),
                },
                "request": {
                    "method": req.method().as_str(),
                    "url": req.url(),
                    "headers": headers_json(req.headers()),
                    "body": req.body_json(),
                    "params": req.params(),
                    "query": req.query_map(),
                },
            }),
        );
    }
}

impl HandleError for ErrorHandler {
    fn handle(&self, error: AppError, req: &Request) -> Response {
        let status = Self::resolve_status(&error);
        self.log(&error, status, req);

        let body = serde_json::to_vec(&self.envelope(&error, req)).unwrap_or_else(|_| {
            br#"{"success":false,"error":{"message":"Internal Server Error"}}"#.to_vec()
        });
        Response::builder().status(status).json(body)
    }
}

fn headers_json(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(name.as_str().to_owned(), Value::String(joined));
    }
    Value::Object(out)
}
