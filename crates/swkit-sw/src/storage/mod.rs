//! Named caches of request → response entries.
//!
//! ```text
//! CacheStorage (handle, cheap to clone)
//!     └── dyn CacheBackend (memory or disk)
//!             └── NamedCache ("fascinante-static-v1", ...)
//!                     └── RequestKey → CacheEntry
//! ```
//!
//! Absence is `Ok(None)`, never an error. A `put` replaces the whole entry
//! for its key in one step; concurrent writers race and the last one wins.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response, ResponseSource};
use thiserror::Error;

use crate::config::StorageConfig;

mod disk;
mod memory;

pub use disk::DiskCacheBackend;
pub use memory::MemoryCacheBackend;

// ==================== Errors ====================

/// Errors raised by a cache backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Quota exceeded: {requested} bytes requested, {quota} bytes allowed")]
    QuotaExceeded { requested: u64, quota: u64 },

    #[error("Method {0} cannot be cached")]
    UnsupportedMethod(String),

    #[error("Cache storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt cache document {name}: {reason}")]
    Corrupt { name: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

// ==================== Keys ====================

/// Identity of a cached request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn for_request(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.as_str().to_string(),
            url: url.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A request header named by the stored response's `Vary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryHeader {
    /// Lowercase header name, or `*`.
    pub name: String,
    /// The request's value when the entry was stored.
    pub value: Option<String>,
}

// ==================== Entries ====================

/// A response header exactly as received. Values are raw bytes since
/// they may carry obs-text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Bytes,
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub status: u16,
    pub headers: Vec<StoredHeader>,
    #[serde(with = "base64_bytes")]
    pub body: Bytes,
    pub vary: Vec<VaryHeader>,
    /// Informational only; entries never expire.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture `response` as the stored answer to `request`.
    pub fn new(request: &Request, response: &Response) -> Result<Self, StorageError> {
        if !request.is_cacheable() {
            return Err(StorageError::UnsupportedMethod(request.method.to_string()));
        }

        let vary = vary_names(&response.headers)
            .into_iter()
            .map(|name| {
                let value = joined_header(&request.headers, &name);
                VaryHeader { name, value }
            })
            .collect();

        let headers = response
            .headers
            .iter()
            .map(|(name, value)| StoredHeader {
                name: name.as_str().to_string(),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
            .collect();

        Ok(Self {
            key: RequestKey::for_request(request),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            vary,
            cached_at: now_millis(),
        })
    }

    /// Whether this entry answers `request`, honouring `Vary`.
    pub fn matches(&self, request: &Request) -> bool {
        self.vary.iter().all(|vary| {
            vary.name != "*" && joined_header(&request.headers, &vary.name) == vary.value
        })
    }

    /// Body length in bytes.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// Rebuild the response, tagged as served by `cache_name`.
    pub fn to_response(&self, cache_name: &str) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(header.name.as_str()),
                HeaderValue::from_bytes(&header.value),
            ) {
                headers.append(name, value);
            }
        }

        Response {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone(),
            url: url::Url::parse(&self.key.url).ok(),
            source: ResponseSource::Cache {
                name: cache_name.to_string(),
            },
        }
    }
}

fn vary_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn joined_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Named Cache ====================

/// One named cache. Entries keep insertion order; overwrites keep position.
#[derive(Debug, Clone, Default)]
pub struct NamedCache {
    pub name: String,
    entries: IndexMap<RequestKey, CacheEntry>,
}

impl NamedCache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: IndexMap::new(),
        }
    }

    /// Find the entry answering `request`.
    pub fn lookup(&self, request: &Request) -> Option<&CacheEntry> {
        if !request.is_cacheable() {
            return None;
        }
        self.entries
            .get(&RequestKey::for_request(request))
            .filter(|entry| entry.matches(request))
    }

    /// Find an entry by key, ignoring `Vary`.
    pub fn get(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    pub fn remove(&mut self, key: &RequestKey) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of body lengths.
    pub fn size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

// ==================== Backend ====================

/// Storage behind [`CacheStorage`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Create the named cache if absent.
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    async fn has(&self, name: &str) -> bool;

    /// Cache names in creation order.
    async fn names(&self) -> Vec<String>;

    /// Delete a whole cache. `Ok(false)` when it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    async fn match_request(
        &self,
        cache: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError>;

    async fn match_key(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, StorageError>;

    /// Store `response` for `request`, replacing any previous entry.
    async fn put(
        &self,
        cache: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), StorageError>;

    async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError>;

    async fn delete_entry(&self, cache: &str, key: &RequestKey) -> Result<bool, StorageError>;
}

// ==================== Handles ====================

/// Cache storage (the `caches` global).
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStorage {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Storage backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()))
    }

    /// Memory or disk storage, as configured.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend: Arc<dyn CacheBackend> = match (&config.directory, config.quota_bytes) {
            (Some(dir), quota) => Arc::new(DiskCacheBackend::open_dir(dir, quota).await?),
            (None, Some(quota)) => Arc::new(MemoryCacheBackend::with_quota(quota)),
            (None, None) => Arc::new(MemoryCacheBackend::new()),
        };
        Ok(Self::new(backend))
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Result<Cache, StorageError> {
        self.backend.open(name).await?;
        Ok(Cache {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }

    /// Handle to a cache that already exists. Never creates one; if the
    /// cache is deleted later the handle reads as empty.
    pub async fn existing(&self, name: &str) -> Option<Cache> {
        self.backend.has(name).await.then(|| Cache {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }

    pub async fn has(&self, name: &str) -> bool {
        self.backend.has(name).await
    }

    /// Get all cache names.
    pub async fn keys(&self) -> Vec<String> {
        self.backend.names().await
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.backend.delete(name).await
    }
}

impl fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

/// An opened named cache.
#[derive(Clone)]
pub struct Cache {
    name: String,
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub async fn get(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        self.backend.match_request(&self.name, request).await
    }

    /// Match by key, ignoring `Vary`.
    pub async fn get_key(&self, key: &RequestKey) -> Result<Option<Response>, StorageError> {
        self.backend.match_key(&self.name, key).await
    }

    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), StorageError> {
        self.backend.put(&self.name, request, response).await
    }

    pub async fn keys(&self) -> Result<Vec<RequestKey>, StorageError> {
        self.backend.keys(&self.name).await
    }

    pub async fn delete(&self, key: &RequestKey) -> Result<bool, StorageError> {
        self.backend.delete_entry(&self.name, key).await
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish()
    }
}
