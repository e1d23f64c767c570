//! Cache port used as a read-through accelerator
//!
//! Repositories only need JSON get/set with a TTL plus key and pattern
//! deletes. [`MemoryCache`] is the in-process implementation.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::repositories::cache_keys::glob_match;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Key-value cache of JSON snapshots
#[async_trait]
pub trait CachePort: Send + Sync + Debug {
    /// `Ok(None)` is a miss
    async fn get_json(&self, key: &str) -> Result<Option<Value>>;

    async fn set_json(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Delete the given keys; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Delete every key matching a glob pattern (`*`, `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    /// Invalidation counter of this cache instance. Every repository sharing
    /// the cache sees the same value.
    fn epoch(&self) -> u64;

    /// Advance the counter; called before an invalidation deletes keys
    fn advance_epoch(&self);
}

/// Cache entry with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The cached value
    value: Value,
    /// When the entry stops being served
    expires_at: Instant,
    /// When the entry was last accessed
    last_accessed: Instant,
}

/// In-process cache with per-entry TTL and least-recently-used eviction
#[derive(Debug, Clone)]
pub struct MemoryCache {
    /// The cache entries
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    /// Maximum number of entries
    max_entries: usize,
    /// Shared by clones so they agree on invalidations
    epoch: Arc<AtomicU64>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryCache {
    /// Create a new memory cache
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.get(key).is_some_and(|e| e.expires_at > now)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Evict expired entries, then the least recently used 10% if still full
    fn evict(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);

        if entries.len() >= max_entries {
            let mut by_access: Vec<(String, Instant)> = entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.last_accessed))
                .collect();
            by_access.sort_by_key(|(_, accessed)| *accessed);

            let to_remove = (max_entries as f64 * 0.1).max(1.0) as usize;
            for (key, _) in by_access.into_iter().take(to_remove) {
                entries.remove(&key);
            }
            debug!(evicted = to_remove, "Memory cache full, evicted least recently used entries");
        }
    }
}

#[async_trait]
impl CachePort for MemoryCache {
    #[instrument(level = "trace", skip(self))]
    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = now;
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set_json(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            Self::evict(&mut entries, self.max_entries);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        debug!(pattern, removed = before - entries.len(), "Deleted cache keys by pattern");
        Ok(())
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = MemoryCache::default();
        assert_eq!(cache.get_json("a").await.unwrap(), None);

        cache.set_json("a", json!({"x": 1}), TTL).await.unwrap();
        assert_eq!(cache.get_json("a").await.unwrap(), Some(json!({"x": 1})));

        cache.delete(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(cache.get_json("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::default();
        cache
            .set_json("short", json!(1), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_json("short").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = MemoryCache::default();
        for key in ["users:id:1", "users:q:list:a", "users:q:by-email:x", "services:q:list"] {
            cache.set_json(key, json!(true), TTL).await.unwrap();
        }
        cache.delete_pattern("users:q:*").await.unwrap();

        assert!(cache.contains_key("users:id:1").await);
        assert!(!cache.contains_key("users:q:list:a").await);
        assert!(!cache.contains_key("users:q:by-email:x").await);
        assert!(cache.contains_key("services:q:list").await);
    }

    #[tokio::test]
    async fn test_full_cache_evicts_least_recently_used() {
        let cache = MemoryCache::new(3);
        cache.set_json("a", json!(1), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set_json("b", json!(2), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set_json("c", json!(3), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        // Touch "a" so "b" becomes the oldest
        cache.get_json("a").await.unwrap();

        cache.set_json("d", json!(4), TTL).await.unwrap();
        assert!(cache.contains_key("a").await);
        assert!(!cache.contains_key("b").await);
        assert!(cache.contains_key("d").await);
        assert_eq!(cache.len().await, 3);
    }
}
