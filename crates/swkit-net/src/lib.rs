//! # SWKit Net
//!
//! Request and response model shared by every SWKit layer, plus the
//! [`Fetcher`] seam through which caching policies reach the network.
//!
//! ## Design Goals
//!
//! 1. **Cheap clones**: response bodies are [`Bytes`], so storing a copy in a
//!    cache and returning the original to the caller costs a refcount bump
//! 2. **Explicit provenance**: every [`Response`] records where it came from
//! 3. **Swappable network**: policies only see `dyn Fetcher`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use swkit_common::SwKitError;
use thiserror::Error;
use url::Url;

pub mod fetch;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use fetch::{Fetcher, FetcherConfig, HttpFetcher};

/// Header set on synthetic offline responses.
pub const OFFLINE_HEADER: &str = "x-swkit-offline";

/// Body of synthetic offline responses.
pub const OFFLINE_BODY: &str = "Resource not available offline";

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<NetError> for SwKitError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Timeout(after) => SwKitError::Timeout(after),
            other => SwKitError::network_with_source("fetch failed", other),
        }
    }
}

/// Whether a URL can travel over the network (`http`/`https`).
pub fn is_network_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An intercepted HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a top-level navigation request (GET accepting HTML).
    pub fn navigate(url: Url) -> Self {
        Self::get(url).header(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        )
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Get a header value as a string.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the request declares acceptance of HTML.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    /// Only GET requests are stored in or served from a cache.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fresh from the network.
    Network,
    /// Served from the named cache.
    Cache { name: String },
    /// Generated locally (offline fallback).
    Synthetic,
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects, when known.
    pub url: Option<Url>,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url: None,
            source: ResponseSource::Network,
        }
    }

    /// The synthetic 503 returned when neither network nor cache can serve.
    pub fn offline_unavailable() -> Self {
        let mut response = Self::new(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.headers.insert(
            HeaderName::from_static(OFFLINE_HEADER),
            HeaderValue::from_static("unavailable"),
        );
        response.source = ResponseSource::Synthetic;
        response
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the provenance.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this is the synthetic offline response.
    pub fn is_offline_unavailable(&self) -> bool {
        self.source == ResponseSource::Synthetic && self.headers.contains_key(OFFLINE_HEADER)
    }

    /// Whether this response was served from a cache.
    pub fn is_from_cache(&self) -> bool {
        matches!(self.source, ResponseSource::Cache { .. })
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}
