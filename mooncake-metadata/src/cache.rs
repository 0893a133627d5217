//! Single-flight segment-descriptor cache (spec §5): a reader-writer lock
//! guards the cached map; `force_update` takes the write path and blocks
//! other refreshers so only one fetch for a given segment is in flight at
//! a time, and everyone else observes the freshly populated entry.

use crate::directory::SegmentDirectory;
use mooncake_common::{Result, Segment};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-key refresh lock. Held across the directory round-trip so concurrent
/// callers for the same segment wait on the one in-flight fetch instead of
/// issuing redundant RPCs.
struct RefreshLocks {
    locks: SyncMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshLocks {
    fn new() -> Self {
        RefreshLocks { locks: SyncMutex::new(HashMap::new()) }
    }

    fn get(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct SegmentDescriptorCache<D: SegmentDirectory> {
    directory: Arc<D>,
    cached: RwLock<HashMap<String, Segment>>,
    refresh_locks: RefreshLocks,
}

impl<D: SegmentDirectory> SegmentDescriptorCache<D> {
    pub fn new(directory: Arc<D>) -> Self {
        SegmentDescriptorCache {
            directory,
            cached: RwLock::new(HashMap::new()),
            refresh_locks: RefreshLocks::new(),
        }
    }

    /// Returns the cached descriptor if present, else fetches and caches it.
    /// Concurrent misses for the same name collapse into one fetch.
    pub async fn get(&self, name: &str) -> Result<Segment> {
        if let Some(seg) = self.cached.read().await.get(name).cloned() {
            return Ok(seg);
        }
        self.force_update(name).await
    }

    /// Unconditionally refetches `name` from the directory. Single-flight:
    /// the per-key mutex ensures only the first caller in a race actually
    /// hits the directory; the rest observe the entry it wrote.
    pub async fn force_update(&self, name: &str) -> Result<Segment> {
        let lock = self.refresh_locks.get(name);
        let _guard = lock.lock().await;
        if let Some(seg) = self.cached.read().await.get(name).cloned() {
            return Ok(seg);
        }
        let fresh = self.directory.get_segment_desc(name).await?;
        self.cached.write().await.insert(name.to_string(), fresh.clone());
        Ok(fresh)
    }

    pub async fn invalidate(&self, name: &str) {
        self.cached.write().await.remove(name);
    }

    /// Write-through publish: stores `segment` in the directory and caches it
    /// immediately, so a subsequent local `get` doesn't race a directory
    /// round-trip to observe the segment it was just asked to publish.
    pub async fn publish(&self, name: &str, segment: Segment) -> Result<()> {
        self.directory.put_segment_desc(name, segment.clone()).await?;
        self.cached.write().await.insert(name.to_string(), segment);
        Ok(())
    }
}
