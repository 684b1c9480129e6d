//! Administrative cache operations.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{CacheStorage, StorageError};

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Storage footprint across every named cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUsage {
    /// Sum of stored body lengths, in bytes.
    pub total_size: u64,
    /// `total_size` for humans, e.g. `1.5 KB`.
    pub formatted_size: String,
    pub cache_count: usize,
}

/// Delete every named cache. Returns how many were removed.
pub async fn clear_all_caches(caches: &CacheStorage) -> Result<usize, StorageError> {
    let mut removed = 0;
    for name in caches.keys().await {
        if caches.delete(&name).await? {
            removed += 1;
        }
    }
    info!(removed, "All caches cleared");
    Ok(removed)
}

/// Walk every cache and entry and sum body sizes.
pub async fn cache_usage(caches: &CacheStorage) -> Result<CacheUsage, StorageError> {
    let mut total_size = 0u64;
    let mut cache_count = 0;

    for name in caches.keys().await {
        // Deleted since listing.
        let Some(cache) = caches.existing(&name).await else {
            continue;
        };
        cache_count += 1;
        for key in cache.keys().await? {
            if let Some(response) = cache.get_key(&key).await? {
                total_size += response.body.len() as u64;
            }
        }
        debug!(cache = %name, total_size, "Measured cache");
    }

    Ok(CacheUsage {
        total_size,
        formatted_size: format_bytes(total_size),
        cache_count,
    })
}

/// 1024-based size with at most two decimals: `0 Bytes`, `1.5 KB`, `2 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}
