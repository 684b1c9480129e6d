//! # SWKit Service Worker
//!
//! Request interception and cache management for an offline-capable site.
//!
//! ## Features
//!
//! - **Classification**: every intercepted request is a static asset, a page,
//!   an API call or something else
//! - **Caching policies**: cache-first, network-first, stale-while-revalidate
//! - **Lifecycle**: pre-warm on install, old-version cleanup on activate
//! - **Host**: registration, scope routing, clients, sync and push delivery
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     └── ServiceWorkerRegistration (scope)
//!             └── active: dyn WorkerHandlers
//!                     └── CacheWorker
//!                             ├── LifecycleManager (install / activate)
//!                             └── Dispatcher
//!                                     ├── Classifier
//!                                     └── CachePolicies ── dyn Fetcher
//!                                             │
//! CacheStorage (caches) ◄─────────────────────┘
//!     └── Cache → RequestKey → CacheEntry
//! ```

use swkit_common::SwKitError;
use swkit_net::NetError;
use thiserror::Error;

pub mod admin;
pub mod classify;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod event;
pub mod lifecycle;
pub mod policy;
pub mod push;
pub mod storage;
pub mod sync;
pub mod worker;

pub use admin::{cache_usage, clear_all_caches, format_bytes, CacheUsage};
pub use classify::{Classifier, ClassifierConfig, ResourceKind};
pub use config::{CacheNames, StorageConfig, WorkerConfig, DEFAULT_CRITICAL_RESOURCES};
pub use container::{
    Client, Clients, RegistrationOptions, RegistrationSnapshot, ServiceWorkerContainer,
    ServiceWorkerEvent, ServiceWorkerId,
};
pub use dispatch::{Dispatcher, FetchOutcome};
pub use event::{
    ActivateEvent, FetchEvent, InstallEvent, NotificationClickEvent, PendingTasks, PushEvent,
    SyncEvent, WaitUntil,
};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleManager, LifecycleState};
pub use policy::{CachePolicies, Strategy};
pub use push::{Notification, NotificationAction, NotificationData, PushPayload};
pub use storage::{
    Cache, CacheBackend, CacheEntry, CacheStorage, DiskCacheBackend, MemoryCacheBackend,
    RequestKey, StorageError, StoredHeader,
};
pub use sync::{SyncManager, BACKGROUND_SYNC_TAG};
pub use worker::{CacheWorker, WorkerHandlers};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Cache error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Push error: {0}")]
    Push(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<ServiceWorkerError> for SwKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(net) => net.into(),
            ServiceWorkerError::Storage(storage) => SwKitError::storage(storage.to_string()),
            ServiceWorkerError::NotFound(what) => SwKitError::NotFound(what),
            other => SwKitError::lifecycle(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_categories() {
        let err: SwKitError = ServiceWorkerError::InstallFailed("/ answered 500".into()).into();
        assert_eq!(err.category(), "lifecycle");

        let timeout = NetError::Timeout(Duration::from_secs(1));
        let err: SwKitError = ServiceWorkerError::Network(timeout).into();
        assert!(err.is_transient());

        let err: SwKitError = ServiceWorkerError::Storage(StorageError::QuotaExceeded {
            requested: 10,
            quota: 5,
        })
        .into();
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_storage_error_converts() {
        fn put() -> Result<(), ServiceWorkerError> {
            Err(StorageError::Unavailable("disk gone".into()))?;
            Ok(())
        }
        assert!(matches!(put(), Err(ServiceWorkerError::Storage(_))));
    }
}
