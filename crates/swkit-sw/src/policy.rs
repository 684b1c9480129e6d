//! Caching policies.
//!
//! Each call is independent: a policy holds no per-request state and never
//! returns an error. Whatever goes wrong, the caller gets a [`Response`],
//! at worst [`Response::offline_unavailable`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use swkit_common::with_timeout;
use swkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::classify::ResourceKind;
use crate::config::CacheNames;
use crate::event::WaitUntil;
use crate::storage::CacheStorage;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Static cache, then network.
    CacheFirst,
    /// Network, then dynamic cache.
    NetworkFirst,
    /// Dynamic cache now, network refresh in the background.
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::StaticAsset => Strategy::CacheFirst,
            ResourceKind::Page => Strategy::StaleWhileRevalidate,
            ResourceKind::Api | ResourceKind::Other => Strategy::NetworkFirst,
        }
    }
}

/// The three policies over one pair of caches.
#[derive(Clone)]
pub struct CachePolicies {
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    names: CacheNames,
    timeout: Duration,
}

impl CachePolicies {
    pub fn new(
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        names: CacheNames,
        timeout: Duration,
    ) -> Self {
        Self {
            caches,
            fetcher,
            names,
            timeout,
        }
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    /// Serve `request` with `strategy`.
    pub async fn serve(
        &self,
        strategy: Strategy,
        request: &Request,
        wait_until: &WaitUntil,
    ) -> Response {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, wait_until).await
            }
        }
    }

    /// Static cache hit wins outright; a miss goes to the network and a
    /// successful answer is stored in the static cache.
    pub async fn cache_first(&self, request: &Request) -> Response {
        if let Some(cached) = self.lookup(&self.names.static_cache, request).await {
            trace!(url = %request.url, "Cache-first hit");
            return cached;
        }

        match self.fetch(request).await {
            Ok(response) => {
                self.store(&self.names.static_cache, request, &response).await;
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first fetch failed");
                Response::offline_unavailable()
            }
        }
    }

    /// Network answer wins; the dynamic cache (then the pre-warmed static
    /// cache) is the fallback when the network fails.
    pub async fn network_first(&self, request: &Request) -> Response {
        match self.fetch(request).await {
            Ok(response) => {
                self.store(&self.names.dynamic_cache, request, &response).await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup_fallback(request).await {
                    Some(cached) => cached,
                    None => Response::offline_unavailable(),
                }
            }
        }
    }

    /// Cached copy now, refreshed copy next time.
    ///
    /// The refresh is spawned through `wait_until` before the cache lookup
    /// and is never awaited by a caller served from cache. With nothing
    /// cached, the caller waits for the refresh's response instead.
    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        wait_until: &WaitUntil,
    ) -> Response {
        let (tx, rx) = oneshot::channel();
        let policies = self.clone();
        let revalidate = request.clone();
        wait_until.spawn(async move {
            let result = policies.fetch(&revalidate).await;
            if let Ok(response) = &result {
                policies
                    .store(&policies.names.dynamic_cache, &revalidate, response)
                    .await;
            }
            if let Err(e) = &result {
                debug!(url = %revalidate.url, error = %e, "Revalidation failed");
            }
            // The caller may already have been served from cache.
            let _ = tx.send(result);
        });

        if let Some(cached) = self.lookup_fallback(request).await {
            trace!(url = %request.url, "Serving cached page, revalidating");
            return cached;
        }

        match rx.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %request.url, error = %e, "Page unavailable offline");
                Response::offline_unavailable()
            }
            Err(_) => {
                warn!(url = %request.url, "Revalidation task ended without a result");
                Response::offline_unavailable()
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        match with_timeout(self.timeout, || self.fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout(self.timeout)),
        }
    }

    /// Dynamic cache, then static cache.
    async fn lookup_fallback(&self, request: &Request) -> Option<Response> {
        match self.lookup(&self.names.dynamic_cache, request).await {
            Some(hit) => Some(hit),
            None => self.lookup(&self.names.static_cache, request).await,
        }
    }

    async fn lookup(&self, cache_name: &str, request: &Request) -> Option<Response> {
        if !request.is_cacheable() || !self.caches.has(cache_name).await {
            return None;
        }
        let cache = match self.caches.open(cache_name).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(cache = cache_name, error = %e, "Cache unavailable");
                return None;
            }
        };
        match cache.get(request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache = cache_name, url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Store a successful answer. Failures are logged and swallowed.
    async fn store(&self, cache_name: &str, request: &Request, response: &Response) {
        if !response.ok() || !request.is_cacheable() {
            trace!(url = %request.url, status = %response.status, "Not caching response");
            return;
        }

        let result = match self.caches.open(cache_name).await {
            Ok(cache) => cache.put(request, response).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(cache = cache_name, url = %request.url, "Response cached"),
            Err(e) => warn!(
                cache = cache_name,
                url = %request.url,
                error = %e,
                "Failed to cache response"
            ),
        }
    }
}

impl fmt::Debug for CachePolicies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicies")
            .field("names", &self.names)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
