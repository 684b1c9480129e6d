//! Background sync registrations.

use indexmap::IndexSet;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The only tag the cache worker acts on.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Registered sync tags, deduplicated, in registration order.
#[derive(Debug, Default)]
pub struct SyncManager {
    tags: RwLock<IndexSet<String>>,
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Returns `false` if it was already pending.
    pub async fn register(&self, tag: &str) -> bool {
        let added = self.tags.write().await.insert(tag.to_string());
        debug!(tag, added, "Sync registered");
        added
    }

    pub async fn get_tags(&self) -> Vec<String> {
        self.tags.read().await.iter().cloned().collect()
    }

    pub async fn is_pending(&self, tag: &str) -> bool {
        self.tags.read().await.contains(tag)
    }

    /// Drop a tag once its sync has run.
    pub async fn complete(&self, tag: &str) -> bool {
        self.tags.write().await.shift_remove(tag)
    }
}

/// Replays deferred work. There is none yet; this only records the call.
pub async fn background_sync() {
    info!("Background sync triggered");
}
