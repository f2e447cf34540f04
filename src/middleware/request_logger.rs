//! Per-request instrumentation: one record on the way in, one when the
//! response is finalized.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::logging::Logger;
use crate::request::Request;

const HOOK_TAG: &str = "request_logger";

/// Logs every request twice through the wrapped [`Logger`]:
///
/// - `Incoming request` with `{method, url, userAgent, ip, timestamp}`
///   before anything else runs;
/// - `Request completed` with `{method, url, statusCode, duration,
///   timestamp}` from the finalize hook, so it reports the status actually
///   sent, including error-handler and not-found responses.
///
/// Register it first so it is the outermost middleware.
#[derive(Clone)]
pub struct RequestLogger {
    logger: Logger,
}

impl RequestLogger {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl Middleware for RequestLogger {
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let started = Instant::now();

        self.logger.info(
            "Incoming request",
            json!({
                "method": req.method().as_str(),
                "url": req.url(),
                "userAgent": req.user_agent(),
                "ip": req.client_addr().to_string(),
                "timestamp": iso_now(),
            }),
        );

        let logger = self.logger.clone();
        let method = req.method().clone();
        let url = req.url().to_owned();
        req.finalizer().wrap(HOOK_TAG, move |response, previous| {
            let duration = started.elapsed().as_millis();
            logger.info(
                "Request completed",
                json!({
                    "method": method.as_str(),
                    "url": url,
                    "statusCode": response.status_code().as_u16(),
                    "duration": format!("{duration}ms"),
                    "timestamp": iso_now(),
                }),
            );
            previous(response)
        });

        Box::pin(next.run(req))
    }
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::logging::{LogService, MemorySink};
    use crate::response::Response;

    #[test]
    fn wrapping_twice_logs_once() {
        let sink = MemorySink::new();
        let logs = LogService::builder().sink(sink.clone()).build();
        let logger = RequestLogger::new(logs.logger("requestLogger"));
        let req = Request::for_test(Method::GET, "/profiles?page=1");

        // Installing the hook a second time must not duplicate records.
        for _ in 0..2 {
            let logger = logger.logger.clone();
            req.finalizer().wrap(HOOK_TAG, move |response, previous| {
                logger.info("Request completed", serde_json::Value::Null);
                previous(response)
            });
        }
        req.finalizer().finalize(Response::status(StatusCode::OK));
        req.finalizer().finalize(Response::status(StatusCode::OK));

        assert_eq!(sink.with_message("Request completed").len(), 1);
    }

    #[tokio::test]
    async fn completion_record_carries_status_and_duration() {
        let sink = MemorySink::new();
        let logs = LogService::builder().sink(sink.clone()).build();
        let middleware = RequestLogger::new(logs.logger("requestLogger"));
        let req = Request::for_test(Method::DELETE, "/matches/9");

        // Simulate the chain: the middleware installs its hook and the
        // server finalizes whatever the chain produced.
        let routes = crate::router::Routes::for_test(|_req: Request| async { StatusCode::NO_CONTENT });
        let next = Next::new(std::sync::Arc::from(Vec::new()), routes);
        let response = middleware.call(req.clone(), next).await;
        req.finalizer().finalize(response);

        let incoming = sink.with_message("Incoming request");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].metadata["method"], "DELETE");
        assert_eq!(incoming[0].metadata["url"], "/matches/9");
        assert_eq!(incoming[0].metadata["ip"], "127.0.0.1");

        let completed = sink.with_message("Request completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].metadata["statusCode"], 204);
        assert!(completed[0].metadata["duration"].as_str().unwrap().ends_with("ms"));
        assert_eq!(completed[0].service, "requestLogger");
    }
}
