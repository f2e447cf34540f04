//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Around the trees sit the
//! middleware chain, the fallback for unmatched requests, and the terminal
//! error handler.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::AppError;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::logging::LogService;
use crate::middleware::{BoxedMiddleware, ErrorHandler, HandleError, Middleware, not_found};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve)
/// or [`App::new`](crate::App::new). Every builder method returns `self`:
///
/// ```rust,no_run
/// # use rapport::{Request, Response, Router};
/// # use rapport::middleware::{ErrorHandler, RequestLogger};
/// # use rapport::logging::LogService;
/// # async fn get_user(_: Request) -> Response { Response::text("") }
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// # let logs = LogService::disabled();
/// Router::new()
///     .layer(RequestLogger::new(logs.logger("requestLogger")))
///     .get("/users/{id}", get_user)
///     .post("/users", create_user)
///     .catch(ErrorHandler::new(logs.logger("errorHandler"), false));
/// ```
///
/// Unless replaced with [`Router::fallback`], unmatched requests go to
/// [`not_found`]. Unless replaced with [`Router::catch`], errors are answered
/// by an [`ErrorHandler`] that logs nowhere and hides diagnostics.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middleware: Vec<BoxedMiddleware>,
    fallback: BoxedHandler,
    error_handler: Arc<dyn HandleError>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: Vec::new(),
            fallback: not_found.into_boxed_handler(),
            error_handler: Arc::new(ErrorHandler::new(LogService::disabled().logger("errorHandler"), false)),
        }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup, so this is a
    /// programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Appends a middleware. The first one registered runs outermost.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Replaces the handler for requests no route matched.
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = handler.into_boxed_handler();
        self
    }

    /// Replaces the terminal error handler.
    pub fn catch(mut self, handler: impl HandleError) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub(crate) fn into_parts(self) -> (Arc<[BoxedMiddleware]>, Arc<Routes>, Arc<dyn HandleError>) {
        let routes = Routes { table: self.routes, fallback: self.fallback };
        (Arc::from(self.middleware), Arc::new(routes), self.error_handler)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// The innermost stage of the chain: route lookup and handler call.
pub(crate) struct Routes {
    table: HashMap<Method, MatchitRouter<BoxedHandler>>,
    fallback: BoxedHandler,
}

impl Routes {
    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = match self.table.get(method).and_then(|tree| tree.at(path).ok()) {
            Some(matched) => matched,
            // HEAD without its own route is answered by the GET route; hyper
            // drops the body.
            None if *method == Method::HEAD => self.table.get(&Method::GET)?.at(path).ok()?,
            None => return None,
        };
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    pub(crate) fn dispatch(&self, req: Request) -> BoxFuture {
        if let Some(rejection) = req.rejection() {
            let error = rejection.clone();
            return Box::pin(async move { Response::failed(error) });
        }
        let handling = match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.set_params(params);
                handler.call(req)
            }
            None => self.fallback.call(req),
        };
        // A panic becomes a failed response here, so every middleware still
        // sees it on the way out.
        Box::pin(async move {
            match AssertUnwindSafe(handling).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => Response::failed(AppError::from_panic(payload)),
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn for_test(endpoint: impl Handler) -> Arc<Self> {
        Arc::new(Self { table: HashMap::new(), fallback: endpoint.into_boxed_handler() })
    }
}
