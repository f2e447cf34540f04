//! Response hardening headers and permissive CORS.

use http::HeaderValue;
use http::header::{self, HeaderName};

use super::Next;
use crate::request::Request;
use crate::response::Response;

const SECURITY_HEADERS: [(HeaderName, &str); 7] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (header::X_DNS_PREFETCH_CONTROL, "off"),
    (header::REFERRER_POLICY, "no-referrer"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=15552000; includeSubDomains"),
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
    (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
];

/// Adds the usual browser-hardening headers to every response, failed ones
/// included. Headers the handler already set are left alone.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.entry(name).or_insert(HeaderValue::from_static(value));
    }
    response
}

/// Allows any origin. Preflight `OPTIONS` requests are answered here with
/// `204 No Content` and never reach routing.
pub async fn cors(req: Request, next: Next) -> Response {
    let preflight = *req.method() == http::Method::OPTIONS
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if preflight {
        Response::builder()
            .status(http::StatusCode::NO_CONTENT)
            .header(header::ACCESS_CONTROL_ALLOW_METHODS.as_str(), "GET,HEAD,PUT,PATCH,POST,DELETE")
            .header(
                header::ACCESS_CONTROL_ALLOW_HEADERS.as_str(),
                req.header(header::ACCESS_CONTROL_REQUEST_HEADERS.as_str()).unwrap_or("*"),
            )
            .no_body()
    } else {
        next.run(req).await
    };

    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
