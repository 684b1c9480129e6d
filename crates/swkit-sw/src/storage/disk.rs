//! Durable cache backend: one JSON document per named cache.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CacheBackend, CacheEntry, MemoryCacheBackend, NamedCache, RequestKey, StorageError};

const EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Caches persisted under a directory.
///
/// Reads are served from memory. Every mutation rewrites the affected
/// document through a temp file and a rename, so a crash never leaves a
/// half-written cache behind.
#[derive(Debug)]
pub struct DiskCacheBackend {
    root: PathBuf,
    memory: MemoryCacheBackend,
    persist: Mutex<()>,
}

impl DiskCacheBackend {
    /// Open (or create) the cache directory and load every document in it.
    ///
    /// Corrupt documents are skipped with a warning.
    pub async fn open_dir(
        root: impl Into<PathBuf>,
        quota: Option<u64>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let memory = match quota {
            Some(quota) => MemoryCacheBackend::with_quota(quota),
            None => MemoryCacheBackend::new(),
        };

        let mut documents = Vec::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match load_document(&path).await {
                Ok(document) => documents.push(document),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping cache document"),
            }
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        for document in documents {
            let mut cache = NamedCache::new(&document.name);
            for entry in document.entries {
                cache.insert(entry);
            }
            memory.restore(cache).await;
        }

        let caches = memory.names().await.len();
        info!(root = %root.display(), caches, "Disk cache loaded");

        Ok(Self {
            root,
            memory,
            persist: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", urlencoding::encode(name), EXTENSION))
    }

    /// Write the current state of `name` to disk (or remove its file).
    async fn persist(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.persist.lock().await;
        let path = self.path_for(name);

        match self.memory.snapshot(name).await {
            Some(cache) => {
                let document = CacheDocument {
                    name: cache.name.clone(),
                    entries: cache.entries().cloned().collect(),
                };
                let bytes = serde_json::to_vec(&document).map_err(|e| StorageError::Corrupt {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

                let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
                tokio::fs::write(&tmp, &bytes).await?;
                tokio::fs::rename(&tmp, &path).await?;
                debug!(cache = name, bytes = bytes.len(), "Cache document written");
            }
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(cache = name, "Cache document removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

async fn load_document(path: &Path) -> Result<CacheDocument, StorageError> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
        name: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl CacheBackend for DiskCacheBackend {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        if self.memory.has(name).await {
            return Ok(());
        }
        self.memory.open(name).await?;
        self.persist(name).await
    }

    async fn has(&self, name: &str) -> bool {
        self.memory.has(name).await
    }

    async fn names(&self) -> Vec<String> {
        self.memory.names().await
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let existed = self.memory.delete(name).await?;
        if existed {
            self.persist(name).await?;
        }
        Ok(existed)
    }

    async fn match_request(
        &self,
        cache: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        self.memory.match_request(cache, request).await
    }

    async fn match_key(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, StorageError> {
        self.memory.match_key(cache, key).await
    }

    async fn put(
        &self,
        cache: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), StorageError> {
        self.memory.put(cache, request, response).await?;
        self.persist(cache).await
    }

    async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError> {
        self.memory.keys(cache).await
    }

    async fn delete_entry(&self, cache: &str, key: &RequestKey) -> Result<bool, StorageError> {
        let removed = self.memory.delete_entry(cache, key).await?;
        if removed {
            self.persist(cache).await?;
        }
        Ok(removed)
    }
}
