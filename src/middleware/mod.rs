//! Middleware layer.
//!
//! Middleware intercepts requests on their way to a handler and responses on
//! their way back. It is the place for cross-cutting concerns: request
//! logging, security headers, CORS.
//!
//! A middleware is any `Fn(Request, Next) -> impl Future<Output = impl
//! IntoResponse>`, or a type implementing [`Middleware`]. Middleware runs in
//! registration order; the first registered is the outermost:
//!
//! ```rust
//! use rapport::{Request, Response, Router, StatusCode};
//! use rapport::middleware::Next;
//!
//! async fn require_json(req: Request, next: Next) -> Response {
//!     if req.method() == "POST" && req.header("content-type") != Some("application/json") {
//!         return Response::status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
//!     }
//!     next.run(req).await
//! }
//!
//! let app = Router::new().layer(require_json);
//! ```
//!
//! Built-in pieces:
//!
//! - [`RequestLogger`]: "Incoming request" / "Request completed" records
//!   with status and duration;
//! - [`not_found`]: the fallback that classifies unmatched routes as 404s;
//! - [`ErrorHandler`]: the terminal error-to-JSON conversion;
//! - [`security_headers`] and [`cors`].

mod error_handler;
mod not_found;
mod request_logger;
mod security;

use std::future::Future;
use std::sync::Arc;

pub use error_handler::{ErrorBody, ErrorEnvelope, ErrorHandler, HandleError};
pub use not_found::not_found;
pub use request_logger::RequestLogger;
pub use security::{cors, security_headers};

pub use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::Routes;

/// A request/response interceptor.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture;
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

impl<F, Fut, R> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let fut = self(req, next);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// The rest of the chain after the current middleware.
///
/// Calling [`Next::run`] hands the request to the next middleware, or to
/// routing once the chain is exhausted. Not calling it short-circuits.
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    routes: Arc<Routes>,
}

impl Next {
    pub(crate) fn new(chain: Arc<[BoxedMiddleware]>, routes: Arc<Routes>) -> Self {
        Self { chain, index: 0, routes }
    }

    pub async fn run(self, req: Request) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Next {
                    chain: Arc::clone(&self.chain),
                    index: self.index + 1,
                    routes: self.routes,
                };
                middleware.call(req, next).await
            }
            None => self.routes.dispatch(req).await,
        }
    }
}
