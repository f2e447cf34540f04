//! End-to-end behaviour of the request pipeline: instrumentation, not-found
//! classification and the terminal error handler, driven through
//! `App::oneshot` without a socket.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use rapport::config::Environment;
use rapport::logging::{LogService, MemorySink};
use rapport::middleware::{ErrorHandler, RequestLogger, cors, security_headers};
use rapport::{AppError, App, Request, Router, StatusCode, create_error, health};
use serde_json::Value;

async fn boom(_req: Request) -> Result<&'static str, AppError> {
    Err(AppError::new("boom"))
}

async fn forbidden(_req: Request) -> Result<&'static str, AppError> {
    Err(create_error("forbidden", 403, true))
}

async fn with_stack(_req: Request) -> Result<&'static str, AppError> {
    Err(create_error("teapot", 418, true).with_stack("at brew (kitchen.rs:1)"))
}

async fn io_failure(_req: Request) -> Result<&'static str, std::io::Error> {
    Err(std::io::Error::other("database unreachable"))
}

async fn panics(_req: Request) -> &'static str {
    panic!("handler exploded")
}

async fn slow(_req: Request) -> &'static str {
    tokio::time::sleep(Duration::from_millis(100)).await;
    "done"
}

async fn echo(req: Request) -> String {
    String::from_utf8_lossy(req.body()).into_owned()
}

async fn profile(req: Request) -> Result<String, AppError> {
    match req.param("id") {
        Some("1") => Ok("alice".to_owned()),
        Some(id) => Err(create_error(format!("profile {id} not found"), 404, true)),
        None => Err(create_error("missing profile id", 400, true)),
    }
}

struct Harness {
    app: App,
    records: MemorySink,
}

fn harness(diagnostics: bool) -> Harness {
    let records = MemorySink::new();
    let logs = LogService::builder().sink(records.clone()).build();

    let router = Router::new()
        .layer(RequestLogger::new(logs.logger("requestLogger")))
        .layer(security_headers)
        .layer(cors)
        .get("/health", health::check(Environment::Test))
        .get("/boom", boom)
        .get("/forbidden", forbidden)
        .get("/teapot", with_stack)
        .get("/io", io_failure)
        .get("/panic", panics)
        .get("/slow", slow)
        .get("/profiles/{id}", profile)
        .post("/echo", echo)
        .catch(ErrorHandler::new(logs.logger("errorHandler"), diagnostics));

    Harness { app: App::new(router).body_limit(64).logging(logs), records }
}

fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::get(uri).body(Bytes::new()).unwrap()
}

async fn json_body(res: http::Response<Full<Bytes>>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(false);
    let res = h.app.oneshot(get("/health")).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = json_body(res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
    assert!(body["timestamp"].is_string());
    assert!(body["uptime"].is_number());
}

#[tokio::test]
async fn unmatched_route_is_a_404_envelope() {
    let h = harness(false);
    let res = h.app.oneshot(get("/does-not-exist")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["message"], "Route GET /does-not-exist not found");
    assert_eq!(body["path"], "/does-not-exist");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn not_found_message_uses_the_original_url() {
    let h = harness(false);
    let req = http::Request::delete("/nowhere?soft=1").body(Bytes::new()).unwrap();
    let body = json_body(h.app.oneshot(req).await).await;
    assert_eq!(body["error"]["message"], "Route DELETE /nowhere?soft=1 not found");
    assert_eq!(body["path"], "/nowhere");
}

#[tokio::test]
async fn error_without_status_is_500_with_its_message() {
    let h = harness(false);
    let res = h.app.oneshot(get("/boom")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"]["message"], "boom");
}

#[tokio::test]
async fn empty_message_becomes_internal_server_error() {
    let router = Router::new().get("/blank", |_req: Request| async { AppError::new("") });
    let res = App::new(router).oneshot(get("/blank")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"]["message"], "Internal Server Error");
}

#[tokio::test]
async fn explicit_status_and_message_are_echoed() {
    let h = harness(false);
    let res = h.app.oneshot(get("/forbidden")).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["message"], "forbidden");
}

#[tokio::test]
async fn converted_std_errors_are_500() {
    let h = harness(false);
    let res = h.app.oneshot(get("/io")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"]["message"], "database unreachable");
}

#[tokio::test]
async fn path_params_reach_handlers_and_error_logs() {
    let h = harness(false);
    let ok = h.app.oneshot(get("/profiles/1")).await;
    assert_eq!(ok.status(), StatusCode::OK);

    let missing = h.app.oneshot(get("/profiles/7")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(missing).await["error"]["message"], "profile 7 not found");

    let logged = h.records.with_message("Error occurred:");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].service, "errorHandler");
    assert_eq!(logged[0].metadata["request"]["params"]["id"], "7");
}

#[tokio::test]
async fn panicking_handler_still_gets_an_envelope() {
    let h = harness(false);
    let res = h.app.oneshot(get("/panic")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"]["message"], "handler exploded");
    assert_eq!(h.records.with_message("Request completed").len(), 1);
}

#[tokio::test]
async fn exactly_one_completion_record_per_request() {
    let h = harness(false);
    let cases = [
        ("/health", 200),
        ("/does-not-exist", 404),
        ("/boom", 500),
        ("/forbidden", 403),
        ("/panic", 500),
    ];
    for (uri, status) in cases {
        h.records.clear();
        let res = h.app.oneshot(get(uri)).await;
        assert_eq!(res.status().as_u16(), status, "{uri}");

        let incoming = h.records.with_message("Incoming request");
        let completed = h.records.with_message("Request completed");
        assert_eq!(incoming.len(), 1, "{uri}");
        assert_eq!(completed.len(), 1, "{uri}");
        assert_eq!(completed[0].metadata["statusCode"], status, "{uri}");
        assert_eq!(completed[0].metadata["url"], uri, "{uri}");
        assert!(completed[0].metadata["duration"].as_str().unwrap().ends_with("ms"));
    }
}

#[tokio::test]
async fn incoming_is_logged_before_completion() {
    let h = harness(false);
    h.app.oneshot(get("/health")).await;
    let messages: Vec<_> = h
        .records
        .records()
        .into_iter()
        .filter(|r| r.service == "requestLogger")
        .map(|r| r.message)
        .collect();
    assert_eq!(messages, ["Incoming request", "Request completed"]);
}

#[tokio::test]
async fn diagnostics_are_hidden_outside_development() {
    let h = harness(false);
    let body = json_body(h.app.oneshot(get("/teapot")).await).await;
    assert_eq!(body["error"]["message"], "teapot");
    assert!(body["error"].get("stack").is_none());
    assert!(body["error"].get("details").is_none());
}

#[tokio::test]
async fn diagnostics_are_shown_in_development() {
    let h = harness(true);
    let res = h.app.oneshot(get("/teapot")).await;
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    let body = json_body(res).await;
    assert_eq!(body["error"]["stack"], "at brew (kitchen.rs:1)");
    assert_eq!(body["error"]["details"]["message"], "teapot");
    assert_eq!(body["error"]["details"]["isOperational"], true);
}

#[tokio::test]
async fn diagnostic_panic_stack_points_at_the_panic_site() {
    let h = harness(true);
    let body = json_body(h.app.oneshot(get("/panic")).await).await;
    let stack = body["error"]["stack"].as_str().unwrap();
    assert!(stack.contains("pipeline::panics"), "{stack}");
    assert_eq!(body["error"]["details"]["isOperational"], false);
}

#[tokio::test]
async fn diagnostic_stack_without_rust_backtrace() {
    let h = harness(true);
    let body = json_body(h.app.oneshot(get("/boom")).await).await;
    let stack = body["error"]["stack"].as_str().unwrap();
    assert!(stack.contains("pipeline::boom"), "{stack}");
}

#[tokio::test]
async fn client_disconnect_still_completes_the_request() {
    let h = harness(false);
    let cut = tokio::time::timeout(Duration::from_millis(10), h.app.oneshot(get("/slow"))).await;
    assert!(cut.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.records.with_message("Incoming request").len(), 1);
    let completed = h.records.with_message("Request completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].metadata["statusCode"], 200);
}

#[tokio::test]
async fn oversized_bodies_are_rejected_with_413() {
    let h = harness(false);
    let small = http::Request::post("/echo").body(Bytes::from_static(b"hi")).unwrap();
    let res = h.app.oneshot(small).await;
    assert_eq!(res.status(), StatusCode::OK);

    let big = http::Request::post("/echo").body(Bytes::from(vec![b'x'; 65])).unwrap();
    let res = h.app.oneshot(big).await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(res).await["error"]["message"], "request entity too large");
    assert_eq!(h.records.with_message("Request completed").len(), 2);
}

#[tokio::test]
async fn security_and_cors_headers_on_every_response() {
    let h = harness(false);
    for uri in ["/health", "/does-not-exist", "/boom", "/panic"] {
        let res = h.app.oneshot(get(uri)).await;
        let headers = res.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff", "{uri}");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN", "{uri}");
        assert_eq!(headers["access-control-allow-origin"], "*", "{uri}");
        assert_eq!(headers["content-type"], "application/json", "{uri}");
    }
}

#[tokio::test]
async fn cors_preflight_short_circuits() {
    let h = harness(false);
    let req = http::Request::builder()
        .method("OPTIONS")
        .uri("/profiles/1")
        .header("access-control-request-method", "PUT")
        .body(Bytes::new())
        .unwrap();
    let res = h.app.oneshot(req).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(h.records.with_message("Error occurred:").is_empty());
}
