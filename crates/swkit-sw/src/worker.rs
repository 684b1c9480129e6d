//! Worker handlers and the cache worker.

use std::sync::Arc;

use async_trait::async_trait;
use swkit_net::{Fetcher, HttpFetcher};
use tracing::{debug, info};
use url::Url;

use crate::classify::Classifier;
use crate::config::{CacheNames, WorkerConfig};
use crate::dispatch::{Dispatcher, FetchOutcome};
use crate::event::{
    ActivateEvent, FetchEvent, InstallEvent, NotificationClickEvent, PushEvent, SyncEvent,
};
use crate::lifecycle::LifecycleManager;
use crate::policy::CachePolicies;
use crate::push::{self, Notification};
use crate::storage::CacheStorage;
use crate::sync::{background_sync, BACKGROUND_SYNC_TAG};
use crate::ServiceWorkerError;

/// Event handlers of a worker script.
///
/// A container calls these; a worker never calls them on itself.
#[async_trait]
pub trait WorkerHandlers: Send + Sync {
    /// Prepare the new version. An error makes the version redundant.
    async fn install(&self, event: &InstallEvent) -> Result<(), ServiceWorkerError>;

    /// Take over from the previous version.
    async fn activate(&self, event: &ActivateEvent) -> Result<(), ServiceWorkerError>;

    /// Answer an intercepted request.
    async fn fetch(&self, event: FetchEvent) -> FetchOutcome;

    async fn sync(&self, _event: &SyncEvent) -> Result<(), ServiceWorkerError> {
        Ok(())
    }

    /// Build the notification to show for a push, if any.
    async fn push(&self, _event: &PushEvent) -> Result<Option<Notification>, ServiceWorkerError> {
        Ok(None)
    }

    /// Path to open for a notification click, relative to the scope.
    async fn notification_click(&self, _event: &NotificationClickEvent) -> Option<String> {
        None
    }
}

/// The site's worker: pre-warms on install, cleans up on activate and
/// serves every request through a caching policy.
#[derive(Debug, Clone)]
pub struct CacheWorker {
    config: WorkerConfig,
    caches: CacheStorage,
    lifecycle: LifecycleManager,
    dispatcher: Dispatcher,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        origin: Url,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let lifecycle =
            LifecycleManager::new(caches.clone(), Arc::clone(&fetcher), &config, origin);
        let policies = CachePolicies::new(
            caches.clone(),
            fetcher,
            config.cache_names(),
            config.network.timeout(),
        );
        let dispatcher = Dispatcher::new(Classifier::new(config.classifier.clone()), policies);

        Self {
            config,
            caches,
            lifecycle,
            dispatcher,
        }
    }

    /// Build the storage backend and HTTP fetcher described by `config`.
    pub async fn from_config(
        config: WorkerConfig,
        origin: Url,
    ) -> Result<Self, ServiceWorkerError> {
        let caches = CacheStorage::from_config(&config.storage).await?;
        let fetcher = HttpFetcher::new(config.network.clone())?;
        Ok(Self::new(config, origin, caches, Arc::new(fetcher)))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn cache_names(&self) -> CacheNames {
        self.config.cache_names()
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[async_trait]
impl WorkerHandlers for CacheWorker {
    async fn install(&self, event: &InstallEvent) -> Result<(), ServiceWorkerError> {
        info!(version = %self.config.version, "Service worker installing");
        self.lifecycle.install().await?;
        event.skip_waiting();
        Ok(())
    }

    async fn activate(&self, event: &ActivateEvent) -> Result<(), ServiceWorkerError> {
        info!(version = %self.config.version, "Service worker activating");
        self.lifecycle.activate().await?;
        event.claim_clients();
        Ok(())
    }

    async fn fetch(&self, event: FetchEvent) -> FetchOutcome {
        let wait_until = event.wait_until().clone();
        self.dispatcher.dispatch(event.request, &wait_until).await
    }

    async fn sync(&self, event: &SyncEvent) -> Result<(), ServiceWorkerError> {
        if event.tag == BACKGROUND_SYNC_TAG {
            background_sync().await;
        } else {
            debug!(tag = %event.tag, "Ignoring sync tag");
        }
        Ok(())
    }

    async fn push(&self, event: &PushEvent) -> Result<Option<Notification>, ServiceWorkerError> {
        push::notification_for_push(event.data.as_deref())
    }

    async fn notification_click(&self, event: &NotificationClickEvent) -> Option<String> {
        push::click_target(event.action.as_deref()).map(str::to_string)
    }
}
