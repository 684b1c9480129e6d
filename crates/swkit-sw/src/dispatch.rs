//! Per-request dispatch: classify, then serve with the matching policy.

use swkit_net::{is_network_scheme, Request, Response};
use tracing::{debug, trace};

use crate::classify::Classifier;
use crate::event::WaitUntil;
use crate::policy::{CachePolicies, Strategy};

/// Result of handling a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself.
    PassThrough(Request),
    /// Answer the request with this response.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough(_))
    }
}

/// Routes requests to caching policies.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    classifier: Classifier,
    policies: CachePolicies,
}

impl Dispatcher {
    pub fn new(classifier: Classifier, policies: CachePolicies) -> Self {
        Self {
            classifier,
            policies,
        }
    }

    pub fn policies(&self) -> &CachePolicies {
        &self.policies
    }

    /// Handle one intercepted request.
    pub async fn dispatch(&self, request: Request, wait_until: &WaitUntil) -> FetchOutcome {
        if !is_network_scheme(&request.url) {
            trace!(url = %request.url, "Passing through non-network request");
            return FetchOutcome::PassThrough(request);
        }

        let kind = self.classifier.classify(&request);
        let strategy = Strategy::for_kind(kind);
        debug!(url = %request.url, ?kind, ?strategy, "Dispatching request");

        let response = self.policies.serve(strategy, &request, wait_until).await;
        FetchOutcome::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheNames;
    use crate::event::PendingTasks;
    use crate::storage::CacheStorage;
    use http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use swkit_net::testing::MockFetcher;
    use url::Url;

    fn dispatcher() -> (Dispatcher, Arc<MockFetcher>, CacheStorage) {
        let caches = CacheStorage::in_memory();
        let fetcher = Arc::new(MockFetcher::new());
        let policies = CachePolicies::new(
            caches.clone(),
            fetcher.clone(),
            CacheNames::new("site", "v1"),
            Duration::from_secs(5),
        );
        (
            Dispatcher::new(Classifier::default(), policies),
            fetcher,
            caches,
        )
    }

    #[tokio::test]
    async fn test_non_network_schemes_pass_through() {
        let (dispatcher, fetcher, _) = dispatcher();

        for url in ["data:text/plain,hello", "chrome-extension://abc/content.js"] {
            let request = Request::get(Url::parse(url).unwrap());
            let outcome = dispatcher.dispatch(request, &WaitUntil::detached()).await;
            match outcome {
                FetchOutcome::PassThrough(request) => assert_eq!(request.url.as_str(), url),
                FetchOutcome::Respond(_) => panic!("{url} should pass through"),
            }
        }
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_static_asset_goes_to_static_cache() {
        let (dispatcher, fetcher, caches) = dispatcher();
        fetcher.route("/styles/critical.css", 200, "body{}");

        let request = Request::get(Url::parse("https://site.test/styles/critical.css").unwrap());
        let outcome = dispatcher
            .dispatch(request.clone(), &WaitUntil::detached())
            .await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::OK);

        let cache = caches.open("site-static-v1").await.unwrap();
        assert!(cache.get(&request).await.unwrap().is_some());
        assert!(!caches.has("site-dynamic-v1").await);
    }

    #[tokio::test]
    async fn test_api_goes_to_dynamic_cache() {
        let (dispatcher, fetcher, caches) = dispatcher();
        fetcher.route("/api/posts", 200, "[]");

        let request = Request::get(Url::parse("https://site.test/api/posts").unwrap());
        let pending = PendingTasks::new();
        let outcome = dispatcher.dispatch(request.clone(), &pending.handle()).await;
        assert!(!outcome.is_pass_through());
        assert_eq!(pending.settle().await, 0);

        let cache = caches.open("site-dynamic-v1").await.unwrap();
        assert!(cache.get(&request).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_page_revalidates_in_background() {
        let (dispatcher, fetcher, _) = dispatcher();
        fetcher.route("/contact", 200, "<form/>");

        let request = Request::navigate(Url::parse("https://site.test/contact").unwrap());
        let pending = PendingTasks::new();
        let outcome = dispatcher.dispatch(request, &pending.handle()).await;

        assert_eq!(outcome.into_response().unwrap().text().unwrap(), "<form/>");
        assert_eq!(pending.settle().await, 1);
    }
}
