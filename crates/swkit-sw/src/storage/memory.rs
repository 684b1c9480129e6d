//! In-memory cache backend.

use async_trait::async_trait;
use indexmap::IndexMap;
use swkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::trace;

use super::{CacheBackend, CacheEntry, NamedCache, RequestKey, StorageError};

/// Caches held in process memory, with an optional byte quota over all
/// bodies.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    caches: RwLock<IndexMap<String, NamedCache>>,
    quota: Option<u64>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push total body bytes past `quota`.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            caches: RwLock::default(),
            quota: Some(quota),
        }
    }

    /// Total body bytes across all caches.
    pub async fn usage(&self) -> u64 {
        self.caches.read().await.values().map(NamedCache::size).sum()
    }

    pub(crate) async fn snapshot(&self, name: &str) -> Option<NamedCache> {
        self.caches.read().await.get(name).cloned()
    }

    pub(crate) async fn restore(&self, cache: NamedCache) {
        self.caches.write().await.insert(cache.name.clone(), cache);
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| NamedCache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    async fn names(&self) -> Vec<String> {
        self.caches.read().await.keys().cloned().collect()
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches.write().await.shift_remove(name).is_some())
    }

    async fn match_request(
        &self,
        cache: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache)
            .and_then(|named| named.lookup(request))
            .map(|entry| entry.to_response(cache)))
    }

    async fn match_key(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, StorageError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache)
            .and_then(|named| named.get(key))
            .map(|entry| entry.to_response(cache)))
    }

    async fn put(
        &self,
        cache: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), StorageError> {
        let entry = CacheEntry::new(request, response)?;
        let mut caches = self.caches.write().await;

        if let Some(quota) = self.quota {
            let current: u64 = caches.values().map(NamedCache::size).sum();
            let replaced = caches
                .get(cache)
                .and_then(|named| named.get(&entry.key))
                .map_or(0, CacheEntry::size);
            let requested = current - replaced + entry.size();
            if requested > quota {
                return Err(StorageError::QuotaExceeded { requested, quota });
            }
        }

        trace!(cache, key = %entry.key, size = entry.size(), "Storing entry");
        caches
            .entry(cache.to_string())
            .or_insert_with(|| NamedCache::new(cache))
            .insert(entry);
        Ok(())
    }

    async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .map(NamedCache::keys)
            .unwrap_or_default())
    }

    async fn delete_entry(&self, cache: &str, key: &RequestKey) -> Result<bool, StorageError> {
        Ok(self
            .caches
            .write()
            .await
            .get_mut(cache)
            .is_some_and(|named| named.remove(key)))
    }
}
