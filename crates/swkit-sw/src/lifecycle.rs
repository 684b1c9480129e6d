//! Install and activate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use swkit_common::with_timeout;
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{CacheNames, WorkerConfig};
use crate::storage::CacheStorage;
use crate::ServiceWorkerError;

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Uninstalled,
    Installing,
    /// Installed, waiting for the previous version to let go.
    Installed,
    Activating,
    Active,
    /// Install failed, or replaced by a newer version.
    Redundant,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache: String,
    pub stored: usize,
}

/// Outcome of activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
}

/// Pre-warms the static cache and retires old cache versions.
#[derive(Clone)]
pub struct LifecycleManager {
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    names: CacheNames,
    origin: Url,
    critical_resources: Vec<String>,
    install_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        config: &WorkerConfig,
        origin: Url,
    ) -> Self {
        Self {
            caches,
            fetcher,
            names: config.cache_names(),
            origin,
            critical_resources: config.critical_resources.clone(),
            install_timeout: config.install_timeout(),
        }
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    /// Fetch every critical resource and store it in the static cache.
    ///
    /// All-or-nothing: one failed fetch, non-success status or failed
    /// write fails the whole install. Fetches run concurrently and nothing
    /// is written until all of them have succeeded.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let requests = self
            .critical_resources
            .iter()
            .map(|path| {
                self.origin
                    .join(path)
                    .map(Request::get)
                    .map_err(|e| ServiceWorkerError::InstallFailed(format!("{path}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            cache = %self.names.static_cache,
            resources = requests.len(),
            "Caching critical resources"
        );

        let fetches = try_join_all(requests.iter().map(|request| self.fetch_critical(request)));
        let responses = with_timeout(self.install_timeout, || fetches)
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed(e.to_string()))??;

        let cache = self.caches.open(&self.names.static_cache).await?;
        for (request, response) in requests.iter().zip(&responses) {
            cache.put(request, response).await.map_err(|e| {
                ServiceWorkerError::InstallFailed(format!("storing {}: {e}", request.url))
            })?;
        }

        info!(cache = %self.names.static_cache, stored = responses.len(), "Install complete");
        Ok(InstallReport {
            cache: self.names.static_cache.clone(),
            stored: responses.len(),
        })
    }

    async fn fetch_critical(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        let response = self.fetcher.fetch(request).await.map_err(|e| {
            ServiceWorkerError::InstallFailed(format!("fetching {}: {e}", request.url))
        })?;
        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{} answered {}",
                request.url, response.status
            )));
        }
        debug!(url = %request.url, bytes = response.body.len(), "Critical resource fetched");
        Ok(response)
    }

    /// Delete every cache outside the current version's allow-list.
    ///
    /// A cache that fails to delete is logged and kept; activation goes on.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let mut report = ActivationReport::default();

        for name in self.caches.keys().await {
            if self.names.is_current(&name) {
                report.kept.push(name);
                continue;
            }
            match self.caches.delete(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleting old cache");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete old cache");
                    report.kept.push(name);
                }
            }
        }

        info!(deleted = report.deleted.len(), "Activation complete");
        Ok(report)
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("names", &self.names)
            .field("origin", &self.origin.as_str())
            .field("critical_resources", &self.critical_resources.len())
            .finish_non_exhaustive()
    }
}
