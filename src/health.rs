//! Health-check handler.
//!
//! ```rust,no_run
//! use rapport::{Router, health};
//! use rapport::config::Environment;
//!
//! let app = Router::new().get("/health", health::check(Environment::Production));
//! ```
//!
//! `GET /health` answers `200 OK` with
//!
//! ```json
//! { "status": "ok", "environment": "production",
//!   "timestamp": "2026-01-01T12:00:00.000Z", "uptime": 12.5 }
//! ```
//!
//! The handler has no dependencies: if the process can answer HTTP at all,
//! it is healthy.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::config::Environment;
use crate::handler::Handler;
use crate::request::Request;
use crate::response::Json;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub environment: &'static str,
    pub timestamp: String,
    /// Seconds since the handler was built, which is startup in practice.
    pub uptime: f64,
}

/// Builds the health handler for `environment`.
pub fn check(environment: Environment) -> impl Handler {
    let started = Instant::now();
    move |_req: Request| async move {
        Json(HealthStatus {
            status: "ok",
            environment: environment.as_str(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            uptime: started.elapsed().as_secs_f64(),
        })
    }
}
