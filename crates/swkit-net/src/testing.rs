//! In-process fetcher for tests.
//!
//! Routes are keyed by URL path. Unrouted paths answer `404`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, StatusCode};
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Reply {
    Respond(Response),
    Fail,
}

/// Counting fake network.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Reply>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    log: Mutex<Vec<Url>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with `status` and `body`.
    pub fn route(&self, path: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        self.route_with_headers(path, status, &[], body)
    }

    /// Answer `path` with `status`, `headers` and `body`.
    pub fn route_with_headers(
        &self,
        path: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> &Self {
        let status = StatusCode::from_u16(status).expect("valid status code");
        let mut response = Response::new(status, body);
        for (name, value) in headers {
            response = response.with_header(
                HeaderName::try_from(*name).expect("valid header name"),
                HeaderValue::try_from(*value).expect("valid header value"),
            );
        }
        self.routes
            .lock()
            .expect("mock routes poisoned")
            .insert(path.to_string(), Reply::Respond(response));
        self
    }

    /// Make `path` fail with a connection error.
    pub fn fail(&self, path: &str) -> &Self {
        self.routes
            .lock()
            .expect("mock routes poisoned")
            .insert(path.to_string(), Reply::Fail);
        self
    }

    /// Fail every request while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().expect("mock delay poisoned") = delay;
    }

    /// Total fetch calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetch calls whose URL path equals `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        self.log
            .lock()
            .expect("mock log poisoned")
            .iter()
            .filter(|url| url.path() == path)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .expect("mock log poisoned")
            .push(request.url.clone());

        let delay = *self.delay.lock().expect("mock delay poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::ConnectionFailed("network is offline".into()));
        }

        let reply = self
            .routes
            .lock()
            .expect("mock routes poisoned")
            .get(request.url.path())
            .cloned();

        match reply {
            Some(Reply::Respond(mut response)) => {
                response.url = Some(request.url.clone());
                Ok(response)
            }
            Some(Reply::Fail) => Err(NetError::ConnectionFailed(format!(
                "connection refused: {}",
                request.url
            ))),
            None => Ok(Response::new(StatusCode::NOT_FOUND, "not found")),
        }
    }
}
