//! # rapport
//!
//! The HTTP backend layer of a friend-matching service: a small hyper-based
//! framework whose job is to make every request observable and every failure
//! look the same to the client.
//!
//! ## What every request gets
//!
//! - An `Incoming request` record when it arrives and exactly one
//!   `Request completed` record, with status and duration, when its response
//!   is finalized ([`middleware::RequestLogger`]).
//! - Unmatched routes classified as 404 errors ([`middleware::not_found`]).
//! - One terminal error handler turning any [`AppError`], converted error or
//!   handler panic into `{success:false, error:{message}, timestamp, path}`
//!   ([`middleware::ErrorHandler`]).
//! - Structured logs with a service tag per component ([`logging`]).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rapport::{AppError, Json, Request, Router, Server, create_error};
//! use rapport::logging::LogService;
//! use rapport::middleware::{ErrorHandler, RequestLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rapport::Error> {
//!     let logs = LogService::disabled();
//!
//!     let app = Router::new()
//!         .layer(RequestLogger::new(logs.logger("requestLogger")))
//!         .get("/profiles/{id}", get_profile)
//!         .catch(ErrorHandler::new(logs.logger("errorHandler"), true));
//!
//!     Server::bind("0.0.0.0:3001")?.serve(app).await
//! }
//!
//! async fn get_profile(req: Request) -> Result<Json<serde_json::Value>, AppError> {
//!     match req.param("id") {
//!         Some("1") => Ok(Json(serde_json::json!({ "id": 1, "name": "alice" }))),
//!         _ => Err(create_error("profile not found", 404, true)),
//!     }
//! }
//! ```

mod error;
mod finalize;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod logging;
pub mod middleware;

pub use error::{AppError, Error, create_error};
pub use finalize::{Finalize, Finalizer};
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::{App, DEFAULT_BODY_LIMIT, Server};
