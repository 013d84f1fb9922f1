//! HTTP client abstraction for testability.
//!
//! Every plugin talks to its provider through [`AsyncHttpClient`], so tests can
//! inject a scripted client instead of reaching the network. Two entry points
//! exist: [`AsyncHttpClient::send`] buffers the whole body (search pages,
//! status documents) and [`AsyncHttpClient::open`] hands back a byte stream for
//! payload transfers.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::{GatewayError, Phase};

/// Default timeout for buffered requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connect timeout for streamed transfers in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// HTTP method subset used by the plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            basic_auth: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is consumed incrementally.
pub struct HttpStream {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: BoxStream<'static, Result<Bytes, HttpError>>,
}

impl HttpStream {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

impl fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Transport-level failure (no HTTP status available).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
    pub timeout: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }
}

/// Trait for asynchronous HTTP operations.
///
/// Non-2xx statuses are *not* errors at this level; callers decide what a
/// status means for their protocol (a 202 from an order endpoint is "not
/// ready yet", a 202 from a search endpoint is a failure).
pub trait AsyncHttpClient: Send + Sync {
    /// Sends a request and buffers the response body.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>>;

    /// Sends a request and returns the response body as a stream.
    fn open(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>>;
}

/// Maps a transport failure to a transient provider error.
pub(crate) fn transport_error(provider: &str, phase: Phase, err: HttpError) -> GatewayError {
    GatewayError::transient(provider, phase, err.message)
}

/// Classifies a non-success status for the given phase.
///
/// 401/403 become authentication failures, 408/429/5xx are transient and
/// everything else is a plain provider error.
pub(crate) fn status_error(provider: &str, phase: Phase, status: u16, url: &str) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Authentication {
            provider: provider.to_string(),
            reason: format!("HTTP {} from {}", status, url),
        },
        408 | 429 | 500..=599 => {
            GatewayError::transient(provider, phase, format!("HTTP {} from {}", status, url))
        }
        _ => GatewayError::provider(provider, phase, format!("HTTP {} from {}", status, url)),
    }
}

/// Sends a request and requires a 2xx answer.
pub(crate) async fn send_checked(
    client: &dyn AsyncHttpClient,
    provider: &str,
    phase: Phase,
    request: HttpRequest,
) -> Result<HttpResponse, GatewayError> {
    let url = request.url.clone();
    let response = client
        .send(request)
        .await
        .map_err(|e| transport_error(provider, phase, e))?;
    if !response.is_success() {
        return Err(status_error(provider, phase, response.status, &url));
    }
    Ok(response)
}

/// Sends a request and decodes a 2xx JSON answer.
pub(crate) async fn send_json(
    client: &dyn AsyncHttpClient,
    provider: &str,
    phase: Phase,
    request: HttpRequest,
) -> Result<Value, GatewayError> {
    let response = send_checked(client, provider, phase, request).await?;
    response.json().map_err(|e| {
        GatewayError::provider(provider, phase, format!("invalid JSON response: {}", e))
    })
}

/// Real HTTP client implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with default configuration.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a new ReqwestClient with a custom timeout for buffered requests.
    ///
    /// Streamed transfers are only bounded by the connect timeout; a large
    /// payload may legitimately take longer than any fixed request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("eogate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::new(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn map_reqwest(err: reqwest::Error) -> HttpError {
    HttpError {
        message: format!("Request failed: {}", err),
        timeout: err.is_timeout(),
    }
}

impl AsyncHttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        let builder = self.build(request).timeout(self.timeout);
        Box::pin(async move {
            let response = builder.send().await.map_err(map_reqwest)?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = response.bytes().await.map_err(map_reqwest)?;
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn open(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>> {
        let builder = self.build(request);
        Box::pin(async move {
            let response = builder.send().await.map_err(map_reqwest)?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = response.bytes_stream().map_err(map_reqwest).boxed();
            Ok(HttpStream {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Canned answer served by [`MockHttpClient`].
    #[derive(Debug, Clone)]
    pub struct MockReply {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Bytes,
        /// Stream only this many bytes, then fail.
        pub fail_after: Option<usize>,
        pub error: Option<HttpError>,
    }

    impl MockReply {
        pub fn bytes(status: u16, body: impl Into<Bytes>) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: body.into(),
                fail_after: None,
                error: None,
            }
        }

        pub fn json(status: u16, value: Value) -> Self {
            Self::bytes(status, value.to_string()).with_header("content-type", "application/json")
        }

        pub fn error(message: &str) -> Self {
            let mut reply = Self::bytes(0, Bytes::new());
            reply.error = Some(HttpError::new(message));
            reply
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers
                .push((name.to_ascii_lowercase(), value.to_string()));
            self
        }

        pub fn truncated_after(mut self, bytes: usize) -> Self {
            self.fail_after = Some(bytes);
            self
        }
    }

    struct Route {
        method: Method,
        prefix: String,
        queued: VecDeque<MockReply>,
        sticky: Option<MockReply>,
    }

    /// Mock HTTP client for testing.
    ///
    /// Replies are routed by method and URL prefix (longest prefix wins).
    /// Queued replies are served once in order; a sticky reply is served
    /// whenever the queue for that route is empty.
    #[derive(Default)]
    pub struct MockHttpClient {
        routes: Mutex<Vec<Route>>,
        calls: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a one-shot reply.
        pub fn on(&self, method: Method, prefix: &str, reply: MockReply) -> &Self {
            let mut routes = self.routes.lock();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.prefix == prefix)
            {
                Some(route) => route.queued.push_back(reply),
                None => routes.push(Route {
                    method,
                    prefix: prefix.to_string(),
                    queued: VecDeque::from([reply]),
                    sticky: None,
                }),
            }
            self
        }

        /// Sets the reply served once the queue is drained.
        pub fn always(&self, method: Method, prefix: &str, reply: MockReply) -> &Self {
            let mut routes = self.routes.lock();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.prefix == prefix)
            {
                Some(route) => route.sticky = Some(reply),
                None => routes.push(Route {
                    method,
                    prefix: prefix.to_string(),
                    queued: VecDeque::new(),
                    sticky: Some(reply),
                }),
            }
            self
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().clone()
        }

        pub fn count(&self, method: Method, prefix: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.method == method && c.url.starts_with(prefix))
                .count()
        }

        fn next_reply(&self, request: &HttpRequest) -> Result<MockReply, HttpError> {
            self.calls.lock().push(request.clone());
            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .filter(|r| r.method == request.method && request.url.starts_with(&r.prefix))
                .max_by_key(|r| r.prefix.len());
            let reply = route.and_then(|r| r.queued.pop_front().or_else(|| r.sticky.clone()));
            match reply {
                Some(MockReply { error: Some(e), .. }) => Err(e),
                Some(reply) => Ok(reply),
                None => Ok(MockReply::bytes(404, "no route")),
            }
        }
    }

    fn range_offset(request: &HttpRequest) -> Option<usize> {
        request
            .header("range")
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.trim_end_matches('-').parse().ok())
    }

    impl AsyncHttpClient for MockHttpClient {
        fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
            let reply = self.next_reply(&request);
            Box::pin(async move {
                let reply = reply?;
                Ok(HttpResponse {
                    status: reply.status,
                    headers: reply.headers,
                    body: reply.body,
                })
            })
        }

        fn open(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>> {
            let reply = self.next_reply(&request);
            Box::pin(async move {
                let reply = reply?;
                let supports_ranges = find_header(&reply.headers, "accept-ranges") == Some("bytes");
                let (status, mut body) = match range_offset(&request) {
                    Some(offset) if supports_ranges && reply.status == 200 => {
                        (206, reply.body.slice(offset.min(reply.body.len())..))
                    }
                    _ => (reply.status, reply.body.clone()),
                };
                let mut chunks: Vec<Result<Bytes, HttpError>> = Vec::new();
                if let Some(limit) = reply.fail_after {
                    body = body.slice(..limit.min(body.len()));
                }
                for chunk in body.chunks(4) {
                    chunks.push(Ok(Bytes::copy_from_slice(chunk)));
                }
                if reply.fail_after.is_some() {
                    chunks.push(Err(HttpError::new("connection reset by peer")));
                }
                Ok(HttpStream {
                    status,
                    headers: reply.headers,
                    body: futures::stream::iter(chunks).boxed(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_mock_client_routes_by_longest_prefix() {
        let mock = MockHttpClient::new();
        mock.always(Method::Get, "http://a", MockReply::bytes(200, "short"));
        mock.always(Method::Get, "http://a/b", MockReply::bytes(200, "long"));

        let res = mock.send(HttpRequest::get("http://a/b/c")).await.unwrap();
        assert_eq!(res.text(), "long");
        let res = mock.send(HttpRequest::get("http://a/x")).await.unwrap();
        assert_eq!(res.text(), "short");
    }

    #[tokio::test]
    async fn test_mock_client_queue_then_sticky() {
        let mock = MockHttpClient::new();
        mock.on(Method::Get, "http://s", MockReply::bytes(202, ""));
        mock.always(Method::Get, "http://s", MockReply::bytes(200, "done"));

        assert_eq!(mock.send(HttpRequest::get("http://s")).await.unwrap().status, 202);
        assert_eq!(mock.send(HttpRequest::get("http://s")).await.unwrap().status, 200);
        assert_eq!(mock.send(HttpRequest::get("http://s")).await.unwrap().status, 200);
        assert_eq!(mock.count(Method::Get, "http://s"), 3);
    }

    #[tokio::test]
    async fn test_mock_client_error() {
        let mock = MockHttpClient::new();
        mock.on(Method::Get, "http://e", MockReply::error("Test error"));
        let result = mock.send(HttpRequest::get("http://e")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_stream_honours_range() {
        let mock = MockHttpClient::new();
        mock.always(
            Method::Get,
            "http://f",
            MockReply::bytes(200, "0123456789").with_header("accept-ranges", "bytes"),
        );
        let stream = mock
            .open(HttpRequest::get("http://f").with_header("Range", "bytes=6-"))
            .await
            .unwrap();
        assert_eq!(stream.status, 206);
        let body: Vec<Bytes> = stream.body.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"6789");
    }

    #[test]
    fn test_status_error_classification() {
        assert!(matches!(
            status_error("p", Phase::Search, 401, "u"),
            GatewayError::Authentication { .. }
        ));
        assert!(status_error("p", Phase::Search, 503, "u").is_transient());
        assert!(status_error("p", Phase::Search, 429, "u").is_transient());
        assert!(!status_error("p", Phase::Search, 400, "u").is_transient());
    }

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::get("http://x")
            .with_header("Accept", "application/json")
            .with_query("limit", "10");
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.query_param("limit"), Some("10"));
        assert_eq!(req.method.to_string(), "GET");
    }

    #[test]
    fn test_reqwest_request_carries_json_body() {
        let client = ReqwestClient::new().unwrap();
        let request = HttpRequest::post("https://api.example/search")
            .with_query("page", "2")
            .with_json(serde_json::json!({"collections": ["s2"]}));
        let built = client.build(request).build().unwrap();
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(built.url().query(), Some("page=2"));
        assert_eq!(
            built.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value =
            serde_json::from_slice(built.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["collections"][0], "s2");
    }
}
