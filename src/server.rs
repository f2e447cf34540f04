//! HTTP server, request dispatch and graceful shutdown.
//!
//! # Request lifecycle
//!
//! ```text
//! hyper request
//!   → body read (over the limit → 413 error)
//!   → middleware chain, outermost first → route handler / fallback
//!   → response carries an error? → error handler
//!   → finalize hooks (exactly once)
//!   → hyper response
//! ```
//!
//! A panicking handler is caught during routing and turned into a 500 error
//! that travels back out through the middleware like any other failure. The
//! lifecycle runs in its own task, so a client that disconnects early still
//! gets its finalize hooks run exactly once.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AppError, Error, create_error};
use crate::logging::LogService;
use crate::middleware::{BoxedMiddleware, HandleError, Next};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Router, Routes};

/// Default request-body limit: 10 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// A router frozen for serving, plus the request-reading settings.
///
/// `App` is what the server runs for every request. It is also the testing
/// seam: [`App::oneshot`] pushes one request through the whole pipeline
/// without a socket.
pub struct App {
    chain: Arc<[BoxedMiddleware]>,
    routes: Arc<Routes>,
    error_handler: Arc<dyn HandleError>,
    body_limit: usize,
    trust_proxy: bool,
    logs: LogService,
}

impl App {
    /// Freezes `router` for serving.
    ///
    /// The first call also installs a process-wide panic hook that records
    /// the panic-site backtrace for [`AppError::from_panic`]; hooks installed
    /// before it keep running.
    pub fn new(router: Router) -> Self {
        crate::error::record_panic_stacks();
        let (chain, routes, error_handler) = router.into_parts();
        Self {
            chain,
            routes,
            error_handler,
            body_limit: DEFAULT_BODY_LIMIT,
            trust_proxy: false,
            logs: LogService::disabled(),
        }
    }

    /// Largest accepted request body in bytes; larger bodies fail with 413.
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Read the client address from `X-Forwarded-For`.
    pub fn trust_proxy(mut self, yes: bool) -> Self {
        self.trust_proxy = yes;
        self
    }

    /// Where background failures (rejections) are reported.
    pub fn logging(mut self, logs: LogService) -> Self {
        self.logs = logs;
        self
    }

    /// Runs one request through the pipeline as if it came from `127.0.0.1`.
    pub async fn oneshot<T: Into<Bytes>>(&self, req: http::Request<T>) -> http::Response<Full<Bytes>> {
        let req = req.map(|body| Full::new(body.into()));
        self.call(req, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Core hot path: one hyper request in, one finalized response out.
    pub async fn call<B>(&self, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let (body, rejection) = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => (collected.to_bytes(), None),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                (Bytes::new(), Some(create_error("request entity too large", 413, true)))
            }
            Err(e) => (Bytes::new(), Some(create_error(format!("invalid request body: {e}"), 400, true))),
        };
        let req = Request::new(parts, body, remote_addr, self.trust_proxy, rejection);

        // The lifecycle runs detached: if hyper drops this future because the
        // client went away, the error handler and finalize hooks still run.
        let next = Next::new(Arc::clone(&self.chain), Arc::clone(&self.routes));
        let error_handler = Arc::clone(&self.error_handler);
        let lifecycle = {
            let req = req.clone();
            let error_handler = Arc::clone(&error_handler);
            async move {
                let response = next.run(req.clone()).await;
                complete(error_handler.as_ref(), &req, response)
            }
        };

        let response = match tokio::spawn(lifecycle).await {
            Ok(response) => response,
            // Handler panics are caught during routing; this is a middleware
            // panic, which skipped the rest of the chain.
            Err(e) if e.is_panic() => {
                complete(error_handler.as_ref(), &req, Response::failed(AppError::from_panic(e.into_panic())))
            }
            Err(_) => complete(error_handler.as_ref(), &req, Response::failed(AppError::new("request cancelled"))),
        };
        response.into_hyper()
    }
}

/// Error handling and finalization: the last two steps of every request.
fn complete(error_handler: &dyn HandleError, req: &Request, mut response: Response) -> Response {
    if let Some(err) = response.take_error() {
        let mut handled = error_handler.handle(err, req);
        // Headers middleware put on the failed response survive.
        handled.inherit_headers(std::mem::take(response.headers_mut()));
        response = handled;
    }
    req.finalizer().finalize(response)
}

impl From<Router> for App {
    fn from(router: Router) -> Self {
        App::new(router)
    }
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use rapport::Server;
    /// let server = Server::bind("0.0.0.0:3001").unwrap();
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address `{addr}`: {e}")))?;
        Ok(Self { addr })
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, app: impl Into<App>) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app.into());

        info!(addr = %self.addr, "rapport listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting even
                // while connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { Ok::<_, std::convert::Infallible>(app.call(req, remote_addr).await) }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound.
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    report_task_failure(&app.logs, joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report_task_failure(&app.logs, joined);
        }

        info!("rapport stopped");
        Ok(())
    }
}

/// A connection task that died without a result is an unhandled rejection.
fn report_task_failure(logs: &LogService, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("connection task failed: {e}");
        logs.report_rejection(
            "connection task failed",
            json!({ "panicked": e.is_panic(), "cancelled": e.is_cancelled(), "error": e.to_string() }),
        );
    }
}

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
