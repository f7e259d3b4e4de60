//! HTTP transport boundary and the caching middleware.
//!
//! All network I/O flows through the [`HttpTransport`] trait so unit tests
//! can run against an in-memory mock instead of loopback servers. The
//! production transport is reqwest with pooled connections, a 30 s connect
//! timeout, a 10 s request timeout, and per-host DNS overrides. When caching
//! is enabled the transport is wrapped in [`CachingTransport`], which honors
//! the request `Cache-Control` header and marks cache hits with
//! `X-From-Cache: 1`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{now_secs, DiskCache, Envelope};

/// Response header set on entries served from the local cache.
pub const FROM_CACHE_HEADER: &str = "X-From-Cache";

/// Weak validator sent alongside freshness-bounded requests.
pub const WEAK_ETAG: &str = "W/\"00000000000000000000000000000000-1\"";

/// Minimal HTTP method enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    /// True when the response was served from the local cache.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.header(FROM_CACHE_HEADER) == Some("1")
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ---------------------------------------------------------------------------
// Cache-Control semantics
// ---------------------------------------------------------------------------

/// How a request allows cached responses to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    /// `max-stale`: any cached response is acceptable.
    AnyAge,
    /// `max-age=N` with N > 0: cached responses younger than N seconds.
    MaxAge(u64),
    /// `max-age=0` or no allowance: always refetch (and store the result).
    Revalidate,
}

fn parse_cache_control(headers: &[(String, String)]) -> Freshness {
    let Some(value) = header_get(headers, "Cache-Control") else {
        return Freshness::Revalidate;
    };
    for directive in value.split(',') {
        let directive = directive.trim();
        if directive.eq_ignore_ascii_case("max-stale") {
            return Freshness::AnyAge;
        }
        if let Some(secs) = directive
            .strip_prefix("max-age=")
            .and_then(|v| v.parse::<u64>().ok())
        {
            if secs == 0 {
                return Freshness::Revalidate;
            }
            return Freshness::MaxAge(secs);
        }
    }
    Freshness::Revalidate
}

/// Transport middleware backed by the on-disk cache.
///
/// Only GET requests are cached. Cache failures degrade to pass-through.
pub struct CachingTransport {
    inner: Arc<dyn HttpTransport>,
    cache: DiskCache,
}

impl CachingTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, cache: DiskCache) -> Self {
        CachingTransport { inner, cache }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    fn serve(envelope: Envelope) -> HttpResponse {
        let mut headers = envelope.headers;
        headers.push((FROM_CACHE_HEADER.to_string(), "1".to_string()));
        HttpResponse {
            status: envelope.status,
            headers,
            body: envelope.body,
        }
    }
}

#[async_trait]
impl HttpTransport for CachingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        if request.method != HttpMethod::Get {
            return self.inner.send(request).await;
        }

        let freshness = parse_cache_control(&request.headers);
        if freshness != Freshness::Revalidate {
            if let Some(envelope) = self.cache.get(&request.url) {
                let acceptable = match freshness {
                    Freshness::AnyAge => true,
                    Freshness::MaxAge(secs) => envelope.age() <= Duration::from_secs(secs),
                    Freshness::Revalidate => false,
                };
                if acceptable {
                    return Ok(Self::serve(envelope));
                }
            }
        }

        let url = request.url.clone();
        let response = self.inner.send(request).await?;

        if (200..300).contains(&response.status) {
            let envelope = Envelope {
                status: response.status,
                headers: response.headers.clone(),
                body: response.body.clone(),
                stored_at_secs: now_secs(),
            };
            if let Err(e) = self.cache.put(&url, &envelope) {
                tracing::warn!(url = %url, error = %e, "cache store failed");
            }
        }

        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Production transport
// ---------------------------------------------------------------------------

/// A real HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the pooled transport: 30 s connect timeout, 30 s keep-alive,
    /// 10 s request timeout, and DNS overrides for hosts with a configured
    /// address.
    pub fn new(dns_overrides: &HashMap<String, IpAddr>) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(10));

        for (hostname, addr) in dns_overrides {
            tracing::debug!(host = %hostname, addr = %addr, "dns override registered");
            builder = builder.resolve(hostname, SocketAddr::new(*addr, 0));
        }

        let client = builder
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (k, v) in request.headers {
            builder = builder.header(&k, &v);
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let mut headers: HttpHeaders = Vec::new();
        for (name, value) in resp.headers().iter() {
            headers.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            ));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// ---------- Test-only mock transport ----------

#[cfg(test)]
pub(crate) use mock::MockTransport;

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory mock transport.
    ///
    /// Designed for unit tests: no sockets, no loopback HTTP servers.
    /// Responses are matched on method + URL and returned in FIFO order; a
    /// fallback handler can serve anything unmatched.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<MockTransportInner>>,
    }

    type Handler = Box<dyn Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync>;

    #[derive(Default)]
    struct MockTransportInner {
        routes: HashMap<(HttpMethod, String), VecDeque<HttpResponse>>,
        handlers: Vec<Handler>,
        requests: Vec<HttpRequest>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a response for a method + URL. Multiple responses for the
        /// same key are returned in FIFO order, with the last one repeating.
        pub fn push_response(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            response: HttpResponse,
        ) {
            let mut inner = self.inner.lock().expect("mock transport lock poisoned");
            inner
                .routes
                .entry((method, url.into()))
                .or_default()
                .push_back(response);
        }

        /// Register a JSON 200 response with optional extra headers.
        pub fn push_json(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            body: &str,
            headers: &[(&str, &str)],
        ) {
            let mut hs: HttpHeaders =
                vec![("content-type".to_string(), "application/json".to_string())];
            for (k, v) in headers {
                hs.push((k.to_string(), v.to_string()));
            }
            self.push_response(
                method,
                url,
                HttpResponse {
                    status: 200,
                    headers: hs,
                    body: body.as_bytes().to_vec(),
                },
            );
        }

        /// Register a catch-all handler tried when no exact route matches.
        pub fn push_handler<F>(&self, handler: F)
        where
            F: Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
        {
            let mut inner = self.inner.lock().expect("mock transport lock poisoned");
            inner.handlers.push(Box::new(handler));
        }

        #[must_use]
        pub fn requests(&self) -> Vec<HttpRequest> {
            let inner = self.inner.lock().expect("mock transport lock poisoned");
            inner.requests.clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut inner = self.inner.lock().expect("mock transport lock poisoned");

            let key = (request.method, request.url.clone());
            inner.requests.push(request.clone());

            if let Some(queue) = inner.routes.get_mut(&key) {
                if let Some(resp) = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                } {
                    return Ok(resp);
                }
            }

            for handler in &inner.handlers {
                if let Some(resp) = handler(&request) {
                    return Ok(resp);
                }
            }

            Err(HttpError::NoMockResponse {
                method: key.0.as_str().to_string(),
                url: key.1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use tempfile::TempDir;

    fn get_request(url: &str, cache_control: Option<&str>) -> HttpRequest {
        let mut headers = Vec::new();
        if let Some(cc) = cache_control {
            headers.push(("Cache-Control".to_string(), cc.to_string()));
        }
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers,
            body: Vec::new(),
        }
    }

    fn ok_response(body: &[u8]) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_vec(),
        }
    }

    fn caching(dir: &TempDir, inner: Arc<dyn HttpTransport>) -> CachingTransport {
        let opts = CacheOptions {
            enabled: true,
            path: Some(dir.path().to_path_buf()),
            size: "1MB".to_string(),
            compression: false,
            ttl: None,
        };
        CachingTransport::new(inner, DiskCache::open(&opts).unwrap())
    }

    #[test]
    fn header_get_is_case_insensitive() {
        let headers: HttpHeaders = vec![
            ("ETag".to_string(), "W/\"abc\"".to_string()),
            ("etag".to_string(), "W/\"def\"".to_string()),
        ];
        assert_eq!(header_get(&headers, "etag"), Some("W/\"abc\""));
        assert_eq!(header_get(&headers, "ETAG"), Some("W/\"abc\""));
        assert_eq!(header_get(&headers, "missing"), None);
    }

    #[test]
    fn cache_control_parsing() {
        let cc = |v: &str| parse_cache_control(&[("Cache-Control".to_string(), v.to_string())]);
        assert_eq!(cc("max-stale"), Freshness::AnyAge);
        assert_eq!(cc("max-age=86400"), Freshness::MaxAge(86400));
        assert_eq!(cc("max-age=0"), Freshness::Revalidate);
        assert_eq!(parse_cache_control(&[]), Freshness::Revalidate);
    }

    #[tokio::test]
    async fn mock_transport_returns_registered_response() {
        let transport = MockTransport::new();
        let url = "https://example.com/api";

        transport.push_response(HttpMethod::Get, url, ok_response(b"hello"));

        let resp = transport
            .send(get_request(url, None))
            .await
            .expect("mock response");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello".to_vec());

        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_errors_when_unregistered() {
        let transport = MockTransport::new();
        let err = transport
            .send(get_request("https://example.com/missing", None))
            .await
            .expect_err("missing mock should error");
        assert!(matches!(err, HttpError::NoMockResponse { .. }));
    }

    #[tokio::test]
    async fn max_stale_serves_cached_and_marks_it() {
        let dir = TempDir::new().unwrap();
        let inner = MockTransport::new();
        inner.push_response(
            HttpMethod::Get,
            "https://gl.example.com/api/v4/users",
            ok_response(b"[]"),
        );
        let transport = caching(&dir, Arc::new(inner.clone()));

        // First call misses and stores.
        let first = transport
            .send(get_request(
                "https://gl.example.com/api/v4/users",
                Some("max-stale"),
            ))
            .await
            .unwrap();
        assert!(!first.from_cache());

        // Second call is served locally.
        let second = transport
            .send(get_request(
                "https://gl.example.com/api/v4/users",
                Some("max-stale"),
            ))
            .await
            .unwrap();
        assert!(second.from_cache());
        assert_eq!(second.body, b"[]".to_vec());
        assert_eq!(inner.requests().len(), 1);
    }

    #[tokio::test]
    async fn max_age_zero_always_revalidates_but_stores() {
        let dir = TempDir::new().unwrap();
        let inner = MockTransport::new();
        inner.push_response(
            HttpMethod::Get,
            "https://gl.example.com/api/v4/version",
            ok_response(b"{\"version\":\"17.0.1\"}"),
        );
        let transport = caching(&dir, Arc::new(inner.clone()));

        for _ in 0..2 {
            let resp = transport
                .send(get_request(
                    "https://gl.example.com/api/v4/version",
                    Some("max-age=0"),
                ))
                .await
                .unwrap();
            assert!(!resp.from_cache());
        }
        assert_eq!(inner.requests().len(), 2);

        // The entry is nonetheless stored for later max-stale readers.
        let later = transport
            .send(get_request(
                "https://gl.example.com/api/v4/version",
                Some("max-stale"),
            ))
            .await
            .unwrap();
        assert!(later.from_cache());
    }

    #[tokio::test]
    async fn stale_entry_is_refetched_under_max_age() {
        let dir = TempDir::new().unwrap();
        let inner = MockTransport::new();
        inner.push_response(
            HttpMethod::Get,
            "https://gl.example.com/api/v4/projects",
            ok_response(b"old"),
        );
        inner.push_response(
            HttpMethod::Get,
            "https://gl.example.com/api/v4/projects",
            ok_response(b"new"),
        );
        let transport = caching(&dir, Arc::new(inner.clone()));

        transport
            .send(get_request(
                "https://gl.example.com/api/v4/projects",
                Some("max-stale"),
            ))
            .await
            .unwrap();

        // Age the stored entry past the freshness bound.
        let mut envelope = transport
            .cache()
            .get("https://gl.example.com/api/v4/projects")
            .unwrap();
        envelope.stored_at_secs -= 3600;
        transport
            .cache()
            .put("https://gl.example.com/api/v4/projects", &envelope)
            .unwrap();

        let resp = transport
            .send(get_request(
                "https://gl.example.com/api/v4/projects",
                Some("max-age=60"),
            ))
            .await
            .unwrap();
        assert!(!resp.from_cache());
        assert_eq!(resp.body, b"new".to_vec());
    }

    #[tokio::test]
    async fn non_get_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let inner = MockTransport::new();
        inner.push_response(
            HttpMethod::Post,
            "https://gl.example.com/api/v4/users",
            ok_response(b"{\"id\":1}"),
        );
        let transport = caching(&dir, Arc::new(inner.clone()));

        let req = HttpRequest {
            method: HttpMethod::Post,
            url: "https://gl.example.com/api/v4/users".to_string(),
            headers: vec![("Cache-Control".to_string(), "max-stale".to_string())],
            body: b"{}".to_vec(),
        };
        let resp = transport.send(req.clone()).await.unwrap();
        assert!(!resp.from_cache());
        let resp = transport.send(req).await.unwrap();
        assert!(!resp.from_cache());
        assert_eq!(inner.requests().len(), 2);
    }

    #[tokio::test]
    async fn error_responses_are_not_stored() {
        let dir = TempDir::new().unwrap();
        let inner = MockTransport::new();
        inner.push_response(
            HttpMethod::Get,
            "https://gl.example.com/api/v4/users",
            HttpResponse {
                status: 500,
                headers: Vec::new(),
                body: b"boom".to_vec(),
            },
        );
        let transport = caching(&dir, Arc::new(inner.clone()));

        transport
            .send(get_request(
                "https://gl.example.com/api/v4/users",
                Some("max-stale"),
            ))
            .await
            .unwrap();
        assert!(transport
            .cache()
            .get("https://gl.example.com/api/v4/users")
            .is_none());
    }
}
