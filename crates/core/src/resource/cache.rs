use crate::config::CacheConfig;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// SHA-256 freshness marker for a piece of content
pub fn etag_for(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A cached full resource
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub content: Bytes,
    pub mime_type: Option<String>,
    pub etag: String,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedResource {
    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_size: usize,
}

struct CacheEntry {
    resource: CachedResource,
    last_access: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
}

impl CacheState {
    fn remove(&mut self, uri: &str) -> bool {
        match self.entries.remove(uri) {
            Some(entry) => {
                self.total_size -= entry.resource.size();
                true
            }
            None => false,
        }
    }
}

/// URI-keyed content cache bounded by total and per-entry size.
///
/// Eviction drops expired entries first, then the least recently used ones.
/// Insertion and eviction share one write lock so `total_size` never drifts;
/// hits only take the read lock and bump an atomic access tick.
pub struct ResourceCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a fresh entry; expired entries count as misses and are dropped
    pub async fn get(&self, uri: &str) -> Option<CachedResource> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        {
            let state = self.state.read().await;
            match state.entries.get(uri) {
                Some(entry) if !entry.resource.is_expired_at(now) => {
                    let tick = self.tick.fetch_add(1, Ordering::Relaxed);
                    entry.last_access.store(tick, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.resource.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let mut state = self.state.write().await;
        let still_expired = state
            .entries
            .get(uri)
            .is_some_and(|entry| entry.resource.is_expired_at(now));
        if still_expired && state.remove(uri) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(uri = %uri, "Dropped expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cache `content` under `uri`, returning the stored entry.
    ///
    /// Returns `None` when caching is disabled or the content is too large
    /// to ever fit.
    pub async fn insert(
        &self,
        uri: &str,
        content: Bytes,
        mime_type: Option<String>,
        ttl: Option<Duration>,
    ) -> Option<CachedResource> {
        let size = content.len();
        if !self.config.enabled
            || size > self.config.max_size_per_resource
            || size > self.config.max_size
        {
            return None;
        }

        let resource = CachedResource {
            etag: etag_for(&content),
            content,
            mime_type,
            cached_at: Instant::now(),
            ttl: ttl.unwrap_or_else(|| self.config.default_ttl()),
        };

        let mut state = self.state.write().await;
        state.remove(uri);
        self.make_room(&mut state, size, resource.cached_at);

        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        state.total_size += size;
        state.entries.insert(
            uri.to_string(),
            CacheEntry {
                resource: resource.clone(),
                last_access: AtomicU64::new(tick),
            },
        );

        tracing::debug!(uri = %uri, size, total_size = state.total_size, "Cached resource");
        Some(resource)
    }

    fn make_room(&self, state: &mut CacheState, incoming: usize, now: Instant) {
        if state.total_size + incoming <= self.config.max_size {
            return;
        }

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.resource.is_expired_at(now))
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in expired {
            if state.remove(&uri) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        while state.total_size + incoming > self.config.max_size {
            let Some(victim) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
                .map(|(uri, _)| uri.clone())
            else {
                break;
            };
            state.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(uri = %victim, "Evicted least recently used entry");
        }
    }

    pub async fn invalidate(&self, uri: &str) -> bool {
        self.state.write().await.remove(uri)
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.total_size = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            total_size: state.total_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, per_resource: usize) -> ResourceCache {
        ResourceCache::new(CacheConfig {
            enabled: true,
            max_size,
            max_size_per_resource: per_resource,
            default_ttl_secs: 60,
        })
    }

    fn bytes(n: usize) -> Bytes {
        Bytes::from(vec![b'x'; n])
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let cache = cache(1024, 1024);
        assert!(cache.get("resource://m/a").await.is_none());
        cache.insert("resource://m/a", bytes(10), None, None).await.unwrap();
        let hit = cache.get("resource://m/a").await.unwrap();
        assert_eq!(hit.size(), 10);
        assert_eq!(hit.etag, etag_for(&bytes(10)));

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.total_size, 10);
    }

    #[tokio::test]
    async fn test_oversized_entries_are_not_cached() {
        let cache = cache(1024, 100);
        assert!(cache.insert("resource://m/big", bytes(101), None, None).await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_keeps_total_bounded() {
        let cache = cache(30, 30);
        cache.insert("resource://m/a", bytes(10), None, None).await;
        cache.insert("resource://m/b", bytes(10), None, None).await;
        cache.insert("resource://m/c", bytes(10), None, None).await;

        // Touch a so b becomes least recently used
        cache.get("resource://m/a").await.unwrap();
        cache.insert("resource://m/d", bytes(10), None, None).await;

        assert!(cache.get("resource://m/b").await.is_none());
        assert!(cache.get("resource://m/a").await.is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_before_lru() {
        let cache = cache(30, 30);
        cache
            .insert("resource://m/short", bytes(10), None, Some(Duration::from_secs(5)))
            .await;
        cache.insert("resource://m/a", bytes(10), None, None).await;
        cache.insert("resource://m/b", bytes(10), None, None).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert("resource://m/c", bytes(10), None, None).await;

        assert!(cache.get("resource://m/a").await.is_some());
        assert!(cache.get("resource://m/b").await.is_some());
        assert!(cache.get("resource://m/c").await.is_some());
        assert_eq!(cache.stats().await.total_size, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_on_read() {
        let cache = cache(1024, 1024);
        cache
            .insert("resource://m/a", bytes(4), None, Some(Duration::from_secs(1)))
            .await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("resource://m/a").await.is_none());
        assert_eq!(cache.stats().await.total_size, 0);
    }

    #[tokio::test]
    async fn test_replacing_entry_adjusts_size() {
        let cache = cache(1024, 1024);
        cache.insert("resource://m/a", bytes(10), None, None).await;
        cache.insert("resource://m/a", bytes(4), None, None).await;
        assert_eq!(cache.stats().await.total_size, 4);
        assert!(cache.invalidate("resource://m/a").await);
        assert!(!cache.invalidate("resource://m/a").await);
        assert_eq!(cache.stats().await.total_size, 0);
    }
}
