//! End-to-end behaviour of the cache worker behind a container.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use swkit_net::testing::MockFetcher;
use swkit_net::{Request, OFFLINE_BODY};
use swkit_sw::{
    cache_usage, CacheStorage, CacheWorker, FetchOutcome, MemoryCacheBackend,
    RegistrationOptions, ServiceWorkerContainer, ServiceWorkerError, ServiceWorkerEvent,
    WorkerConfig, BACKGROUND_SYNC_TAG,
};
use url::Url;

const ORIGIN: &str = "https://fascinante.test";
const SCRIPT: &str = "https://fascinante.test/sw.js";

struct Site {
    container: ServiceWorkerContainer,
    events: tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    fetcher: Arc<MockFetcher>,
    caches: CacheStorage,
}

fn config(version: &str) -> WorkerConfig {
    WorkerConfig {
        version: version.to_string(),
        ..WorkerConfig::default()
    }
}

fn route_critical(fetcher: &MockFetcher, config: &WorkerConfig) {
    for path in &config.critical_resources {
        fetcher.route(path, 200, format!("critical {path}"));
    }
}

fn worker(config: WorkerConfig, caches: &CacheStorage, fetcher: &Arc<MockFetcher>) -> CacheWorker {
    CacheWorker::new(
        config,
        Url::parse(ORIGIN).unwrap(),
        caches.clone(),
        fetcher.clone(),
    )
}

/// A container with the v1 worker installed and active.
async fn site_with(caches: CacheStorage) -> Site {
    let (container, events) = ServiceWorkerContainer::new();
    let fetcher = Arc::new(MockFetcher::new());
    let config = config("v1");
    route_critical(&fetcher, &config);

    container
        .register(
            SCRIPT,
            RegistrationOptions::with_scope("/"),
            Arc::new(worker(config, &caches, &fetcher)),
        )
        .await
        .unwrap();

    Site {
        container,
        events,
        fetcher,
        caches,
    }
}

async fn site() -> Site {
    site_with(CacheStorage::in_memory()).await
}

fn get(path: &str) -> Request {
    Request::get(Url::parse(&format!("{ORIGIN}{path}")).unwrap())
}

fn page(path: &str) -> Request {
    Request::navigate(Url::parse(&format!("{ORIGIN}{path}")).unwrap())
}

fn respond(outcome: FetchOutcome) -> swkit_net::Response {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::PassThrough(request) => panic!("{} was not intercepted", request.url),
    }
}

#[tokio::test]
async fn test_install_prewarms_static_cache() {
    let site = site().await;

    let cache = site.caches.open("fascinante-static-v1").await.unwrap();
    assert_eq!(cache.keys().await.unwrap().len(), 11);
    assert_eq!(site.fetcher.call_count(), 11);
}

#[tokio::test]
async fn test_cached_static_asset_makes_no_network_call() {
    let site = site().await;
    let before = site.fetcher.call_count();

    for path in ["/styles/critical.css", "/fonts/inter-tight-400.woff2", "/images/logo.webp"] {
        let response = respond(site.container.handle_fetch(get(path)).await);
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.is_from_cache());
    }

    site.container.settle().await;
    assert_eq!(site.fetcher.call_count(), before);
}

#[tokio::test]
async fn test_critical_css_with_empty_cache() {
    let (container, _events) = ServiceWorkerContainer::new();
    let fetcher = Arc::new(MockFetcher::new());
    let caches = CacheStorage::in_memory();
    let config = WorkerConfig {
        critical_resources: Vec::new(),
        ..config("v1")
    };
    container
        .register(
            SCRIPT,
            RegistrationOptions::default(),
            Arc::new(worker(config, &caches, &fetcher)),
        )
        .await
        .unwrap();

    fetcher.route("/styles/critical.css", 200, "body{margin:0}");
    let request = get("/styles/critical.css");
    let response = respond(container.handle_fetch(request.clone()).await);

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(fetcher.calls_to("/styles/critical.css"), 1);
    let cache = caches.open("fascinante-static-v1").await.unwrap();
    assert!(cache.get(&request).await.unwrap().is_some());

    // Mirrors a non-success status without caching it.
    fetcher.route("/styles/missing.css", 404, "");
    let response = respond(container.handle_fetch(get("/styles/missing.css")).await);
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(cache.get(&get("/styles/missing.css")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_page_with_dynamic_entry_revalidates_once() {
    let site = site().await;
    let request = page("/blog");
    site.caches
        .open("fascinante-dynamic-v1")
        .await
        .unwrap()
        .put(&request, &swkit_net::Response::new(StatusCode::OK, "old blog"))
        .await
        .unwrap();
    site.fetcher.route("/blog", 200, "new blog");
    let before = site.fetcher.calls_to("/blog");

    let response = respond(site.container.handle_fetch(request.clone()).await);
    assert_eq!(response.text().unwrap(), "old blog");

    site.container.settle().await;
    assert_eq!(site.fetcher.calls_to("/blog"), before + 1);

    let response = respond(site.container.handle_fetch(request).await);
    assert_eq!(response.text().unwrap(), "new blog");
}

#[tokio::test]
async fn test_page_traffic_does_not_accumulate_tasks() {
    let site = site().await;
    site.fetcher.route("/blog", 200, "blog");

    for _ in 0..2000 {
        respond(site.container.handle_fetch(page("/blog")).await);
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(site.container.pending_tasks(), 0);

    respond(site.container.handle_fetch(page("/blog")).await);
    assert!(site.container.pending_tasks() <= 1);
    assert_eq!(site.container.settle().await, 2001);
}

#[tokio::test]
async fn test_page_revalidation_counts_even_when_it_fails() {
    let site = site().await;
    let request = page("/about");
    site.caches
        .open("fascinante-dynamic-v1")
        .await
        .unwrap()
        .put(&request, &swkit_net::Response::new(StatusCode::OK, "about"))
        .await
        .unwrap();
    site.fetcher.set_offline(true);
    let before = site.fetcher.calls_to("/about");

    let response = respond(site.container.handle_fetch(request).await);
    assert_eq!(response.text().unwrap(), "about");

    site.container.settle().await;
    assert_eq!(site.fetcher.calls_to("/about"), before + 1);
}

#[tokio::test]
async fn test_prewarmed_page_served_offline() {
    let site = site().await;
    site.fetcher.set_offline(true);

    let response = respond(site.container.handle_fetch(page("/services")).await);
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), "critical /services");
}

#[tokio::test]
async fn test_api_online_updates_dynamic_cache() {
    let site = site().await;
    site.fetcher.route_with_headers(
        "/api/posts",
        200,
        &[("content-type", "application/json")],
        r#"[{"id":1}]"#,
    );

    let request = get("/api/posts");
    let response = respond(site.container.handle_fetch(request.clone()).await);
    assert_eq!(response.text().unwrap(), r#"[{"id":1}]"#);

    let cache = site.caches.open("fascinante-dynamic-v1").await.unwrap();
    let stored = cache.get(&request).await.unwrap().unwrap();
    assert_eq!(stored.body, response.body);
    assert_eq!(stored.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_api_contact_offline_is_503() {
    let site = site().await;
    site.fetcher.set_offline(true);

    let response = respond(site.container.handle_fetch(get("/api/contact")).await);
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().unwrap(), OFFLINE_BODY);
    assert!(response.is_offline_unavailable());
}

#[tokio::test]
async fn test_api_offline_serves_last_good_copy() {
    let site = site().await;
    site.fetcher.route("/api/posts", 200, "cached posts");
    respond(site.container.handle_fetch(get("/api/posts")).await);

    site.fetcher.set_offline(true);
    let response = respond(site.container.handle_fetch(get("/api/posts")).await);
    assert_eq!(response.text().unwrap(), "cached posts");
}

#[tokio::test]
async fn test_post_is_never_cached() {
    let site = site().await;
    site.fetcher.route("/api/contact", 200, "sent");

    let request = Request::post(
        Url::parse(&format!("{ORIGIN}/api/contact")).unwrap(),
        Bytes::from_static(br#"{"name":"Ana"}"#),
    )
    .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let response = respond(site.container.handle_fetch(request).await);
    assert_eq!(response.text().unwrap(), "sent");

    let cache = site.caches.open("fascinante-dynamic-v1").await.unwrap();
    assert!(cache.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_http_requests_pass_through() {
    let site = site().await;
    let before = site.fetcher.call_count();

    let request = Request::get(Url::parse("data:image/png;base64,AAAA").unwrap());
    assert!(site.container.handle_fetch(request).await.is_pass_through());
    assert_eq!(site.fetcher.call_count(), before);
}

#[tokio::test]
async fn test_install_twice_is_idempotent() {
    let site = site().await;
    let cache = site.caches.open("fascinante-static-v1").await.unwrap();
    let first = cache.keys().await.unwrap();

    let again = config("v1");
    site.container
        .register(
            SCRIPT,
            RegistrationOptions::default(),
            Arc::new(worker(again, &site.caches, &site.fetcher)),
        )
        .await
        .unwrap();

    assert_eq!(cache.keys().await.unwrap(), first);
}

#[tokio::test]
async fn test_new_version_deletes_old_caches() {
    let site = site().await;
    site.fetcher.route("/api/posts", 200, "[]");
    respond(site.container.handle_fetch(get("/api/posts")).await);
    site.caches.open("fascinante-static-v2").await.unwrap();
    site.caches.open("fascinante-dynamic-v2").await.unwrap();
    assert_eq!(site.caches.keys().await.len(), 4);

    let v2 = config("v2");
    site.container
        .register(
            SCRIPT,
            RegistrationOptions::default(),
            Arc::new(worker(v2, &site.caches, &site.fetcher)),
        )
        .await
        .unwrap();

    let mut names = site.caches.keys().await;
    names.sort();
    assert_eq!(names, vec!["fascinante-dynamic-v2", "fascinante-static-v2"]);
}

#[tokio::test]
async fn test_failed_update_keeps_old_version_serving() {
    let mut site = site().await;
    while site.events.try_recv().is_ok() {}

    let v2 = config("v2");
    site.fetcher.fail("/images/hero-bg.webp");
    let err = site
        .container
        .register(
            SCRIPT,
            RegistrationOptions::default(),
            Arc::new(worker(v2, &site.caches, &site.fetcher)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceWorkerError::InstallFailed(_)));

    // v1 caches survive and v1 still answers.
    assert!(site.caches.has("fascinante-static-v1").await);
    assert!(!site.caches.has("fascinante-static-v2").await);
    let response = respond(site.container.handle_fetch(get("/styles/critical.css")).await);
    assert!(response.is_from_cache());

    let mut redundant = false;
    while let Ok(event) = site.events.try_recv() {
        if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
            redundant |= new_state == swkit_sw::LifecycleState::Redundant;
        }
    }
    assert!(redundant);
}

#[tokio::test]
async fn test_quota_exhaustion_still_serves_network() {
    // Room for the pre-warm and little else.
    let prewarm: u64 = config("v1")
        .critical_resources
        .iter()
        .map(|path| format!("critical {path}").len() as u64)
        .sum();
    let caches = CacheStorage::new(Arc::new(MemoryCacheBackend::with_quota(prewarm + 4)));
    let site = site_with(caches).await;

    site.fetcher.route("/api/report", 200, "a response far larger than four bytes");
    let request = get("/api/report");
    let response = respond(site.container.handle_fetch(request.clone()).await);
    assert_eq!(response.text().unwrap(), "a response far larger than four bytes");

    let cache = site.caches.open("fascinante-dynamic-v1").await.unwrap();
    assert!(cache.get(&request).await.unwrap().is_none());
}

#[tokio::test]
async fn test_push_and_notification_click() {
    let mut site = site().await;
    let scope = format!("{ORIGIN}/");

    let shown = site
        .container
        .dispatch_push(&scope, Some(Bytes::from_static(br#"{"title":"Nuevo","body":"Post"}"#)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shown.title, "Nuevo");

    assert!(site.container.dispatch_push(&scope, None).await.unwrap().is_none());
    assert!(matches!(
        site.container
            .dispatch_push(&scope, Some(Bytes::from_static(b"{oops")))
            .await,
        Err(ServiceWorkerError::Push(_))
    ));

    // A bad push does not poison the next one.
    assert!(site
        .container
        .dispatch_push(&scope, Some(Bytes::from_static(br#"{"title":"Again"}"#)))
        .await
        .unwrap()
        .is_some());

    let closed = site
        .container
        .notification_click(&scope, shown.clone(), Some("close"))
        .await
        .unwrap();
    assert!(closed.is_none());

    let opened = site
        .container
        .notification_click(&scope, shown, Some("explore"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened.url.as_str(), "https://fascinante.test/");

    let mut shown_events = 0;
    let mut opened_windows = 0;
    while let Ok(event) = site.events.try_recv() {
        match event {
            ServiceWorkerEvent::NotificationShown { .. } => shown_events += 1,
            ServiceWorkerEvent::OpenWindow { .. } => opened_windows += 1,
            _ => {}
        }
    }
    assert_eq!(shown_events, 2);
    assert_eq!(opened_windows, 1);
}

#[tokio::test]
async fn test_background_sync() {
    let site = site().await;
    let scope = format!("{ORIGIN}/");

    assert!(matches!(
        site.container.dispatch_sync(&scope, BACKGROUND_SYNC_TAG).await,
        Err(ServiceWorkerError::NotFound(_))
    ));

    assert!(site.container.register_sync(BACKGROUND_SYNC_TAG).await);
    site.container
        .dispatch_sync(&scope, BACKGROUND_SYNC_TAG)
        .await
        .unwrap();
    assert!(site.container.sync.get_tags().await.is_empty());
}

#[tokio::test]
async fn test_usage_reports_prewarm_size() {
    let site = site().await;
    let usage = cache_usage(&site.caches).await.unwrap();

    let expected: u64 = config("v1")
        .critical_resources
        .iter()
        .map(|path| format!("critical {path}").len() as u64)
        .sum();
    assert_eq!(usage.total_size, expected);
    assert_eq!(usage.cache_count, 1);
}

#[tokio::test]
async fn test_disk_backed_site_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("v1");
    config.storage.directory = Some(dir.path().to_path_buf());

    {
        let caches = CacheStorage::from_config(&config.storage).await.unwrap();
        let site = site_with(caches).await;
        site.container.settle().await;
    }

    let caches = CacheStorage::from_config(&config.storage).await.unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.set_offline(true);
    let worker = worker(config, &caches, &fetcher);

    let response = respond(
        worker
            .dispatcher()
            .dispatch(get("/styles/loading.css"), &swkit_sw::WaitUntil::detached())
            .await,
    );
    assert_eq!(response.text().unwrap(), "critical /styles/loading.css");
    assert_eq!(fetcher.call_count(), 0);
}
