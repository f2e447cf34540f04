//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, header};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::finalize::Finalizer;

/// An incoming HTTP request with its body fully read.
///
/// `Request` is a handle: cloning it is one atomic increment and every clone
/// sees the same request. The server keeps a clone so the error handler and
/// the finalize hooks can still read the request after the handler consumed
/// its copy.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    client_addr: IpAddr,
    query: Map<String, Value>,
    params: OnceLock<HashMap<String, String>>,
    /// Set when reading the body failed; the router answers with it instead
    /// of dispatching.
    rejection: Option<AppError>,
    finalizer: Finalizer,
}

impl Request {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
        trust_proxy: bool,
        rejection: Option<AppError>,
    ) -> Self {
        let client_addr = client_addr(&parts.headers, remote_addr, trust_proxy);
        let query = parse_query(parts.uri.query().unwrap_or(""));
        Self {
            inner: Arc::new(Inner {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
                client_addr,
                query,
                params: OnceLock::new(),
                rejection,
                finalizer: Finalizer::new(),
            }),
        }
    }

    pub fn method(&self) -> &Method { &self.inner.method }
    pub fn uri(&self) -> &Uri { &self.inner.uri }
    pub fn path(&self) -> &str { self.inner.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    pub fn body(&self) -> &[u8] { &self.inner.body }

    /// Path plus query string, e.g. `/users?page=2`.
    pub fn url(&self) -> &str {
        self.inner.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// The URL as the client sent it. rapport does not mount sub-routers, so
    /// this is always equal to [`url`](Request::url).
    pub fn original_url(&self) -> &str {
        self.url()
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    /// The peer address, or the first `X-Forwarded-For` hop when the server
    /// trusts its proxy.
    pub fn client_addr(&self) -> IpAddr { self.inner.client_addr }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get()?.get(key).map(String::as_str)
    }

    /// All path parameters; empty before routing and for unmatched requests.
    pub fn params(&self) -> HashMap<String, String> {
        self.inner.params.get().cloned().unwrap_or_default()
    }

    /// First value of a query-string key, percent-decoded.
    pub fn query(&self, key: &str) -> Option<&str> {
        match self.inner.query.get(key)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) => values.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// The decoded query string. Repeated keys become arrays.
    pub fn query_map(&self) -> &Map<String, Value> { &self.inner.query }

    /// The body as JSON, for logging.
    ///
    /// JSON bodies are parsed, URL-encoded forms become an object, anything
    /// else (including an empty or unparsable body) is `{}`.
    pub fn body_json(&self) -> Value {
        let content_type = self.header(header::CONTENT_TYPE.as_str()).unwrap_or("");
        if content_type.starts_with("application/json") {
            if let Ok(v) = serde_json::from_slice(&self.inner.body) {
                return v;
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            return Value::Object(parse_query(&String::from_utf8_lossy(&self.inner.body)));
        }
        Value::Object(Map::new())
    }

    /// The finalize hook point for this request's response.
    pub fn finalizer(&self) -> &Finalizer { &self.inner.finalizer }

    pub(crate) fn set_params(&self, params: HashMap<String, String>) {
        // Routing happens once per request; a second set is ignored.
        let _ = self.inner.params.set(params);
    }

    pub(crate) fn rejection(&self) -> Option<&AppError> {
        self.inner.rejection.as_ref()
    }

    /// A bare request for unit tests of middleware and handlers.
    #[cfg(test)]
    pub(crate) fn for_test(method: Method, uri: &str) -> Self {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        Self::new(parts, Bytes::new(), SocketAddr::from(([127, 0, 0, 1], 4000)), false, None)
    }
}

fn client_addr(headers: &HeaderMap, remote: SocketAddr, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    remote.ip()
}

fn parse_query(raw: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        let v = Value::String(v.into_owned());
        match out.get_mut(k.as_ref()) {
            None => {
                out.insert(k.into_owned(), v);
            }
            Some(Value::Array(values)) => values.push(v),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, v]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(builder: http::request::Builder, body: &'static str, trust_proxy: bool) -> Request {
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        let remote = SocketAddr::from(([10, 0, 0, 1], 5555));
        Request::new(parts, Bytes::from_static(body.as_bytes()), remote, trust_proxy, None)
    }

    #[test]
    fn url_keeps_the_query_string() {
        let req = Request::for_test(Method::GET, "/matches?page=2&tag=a&tag=b");
        assert_eq!(req.path(), "/matches");
        assert_eq!(req.url(), "/matches?page=2&tag=a&tag=b");
        assert_eq!(req.original_url(), req.url());
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("tag"), Some("a"));
        assert_eq!(req.query_map()["tag"], json!(["a", "b"]));
    }

    #[test]
    fn query_values_are_decoded() {
        let req = Request::for_test(Method::GET, "/search?q=hello%20world&x=a+b");
        assert_eq!(req.query("q"), Some("hello world"));
        assert_eq!(req.query("x"), Some("a b"));
    }

    #[test]
    fn forwarded_for_is_only_trusted_when_configured() {
        let b = || http::Request::builder().uri("/").header("x-forwarded-for", "203.0.113.7, 10.0.0.2");
        assert_eq!(request(b(), "", false).client_addr().to_string(), "10.0.0.1");
        assert_eq!(request(b(), "", true).client_addr().to_string(), "203.0.113.7");
    }

    #[test]
    fn body_json_by_content_type() {
        let json_req = request(
            http::Request::builder().uri("/").header("content-type", "application/json"),
            r#"{"name":"alice"}"#,
            false,
        );
        assert_eq!(json_req.body_json(), json!({ "name": "alice" }));

        let form_req = request(
            http::Request::builder()
                .uri("/")
                .header("content-type", "application/x-www-form-urlencoded"),
            "name=bob&age=30",
            false,
        );
        assert_eq!(form_req.body_json(), json!({ "name": "bob", "age": "30" }));

        let text_req = request(http::Request::builder().uri("/"), "plain", false);
        assert_eq!(text_req.body_json(), json!({}));
    }

    #[test]
    fn params_are_set_once() {
        let req = Request::for_test(Method::GET, "/users/42");
        assert_eq!(req.param("id"), None);
        req.set_params(HashMap::from([("id".to_owned(), "42".to_owned())]));
        req.set_params(HashMap::from([("id".to_owned(), "43".to_owned())]));
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.clone().param("id"), Some("42"));
    }
}
