//! Response cache for decision-engine outputs
//!
//! Keys are the SHA-256 of the rendered prompt, so the same opportunity maps
//! to the same entry across processes. The cache is soft state: entries may
//! be evicted at any time and callers treat every failure as a miss.

use crate::engine::DecisionResponse;
use crate::error::Result;
use crate::ledger::fingerprint::compute_checksum;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default number of entries kept before eviction
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Content-addressed key for a prompt
pub fn cache_key(prompt: &str) -> String {
    compute_checksum(prompt.as_bytes())
}

/// A cached engine answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: DecisionResponse,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>>;

    async fn put(&self, key: &str, response: DecisionResponse, ttl: Duration) -> Result<()>;

    fn stats(&self) -> CacheStats;
}

/// Bounded in-process cache
pub struct MemoryResponseCache {
    entries: DashMap<String, CachedResponse>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for MemoryResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Peek at an entry without touching hit counters or expiry
    pub fn peek(&self, key: &str) -> Option<CachedResponse> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Make room for one more entry, oldest first
    fn make_room(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if self.purge_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        let excess = self.entries.len() + 1 - self.max_entries;
        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.cached_at, entry.key().clone()))
            .collect();
        by_age.sort();
        for (_, key) in by_age.into_iter().take(excess) {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop `key` only if the entry stored now is still expired, so a
    /// concurrent refresh survives
    fn evict_expired(&self, key: &str, now: DateTime<Utc>) -> bool {
        let evicted = self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some();
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        let now = Utc::now();
        let found = self.entries.get(key).map(|entry| entry.value().clone());
        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Some(_) => {
                self.evict_expired(key, now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, response: DecisionResponse, ttl: Duration) -> Result<()> {
        let cached_at = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(1));
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        debug!(key = %key, model = %response.model, "Caching decision response");
        self.entries.insert(
            key.to_string(),
            CachedResponse {
                response,
                cached_at,
                expires_at: cached_at + ttl,
            },
        );
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Tier;

    fn response(model: &str) -> DecisionResponse {
        DecisionResponse {
            content: "Decision: stop".into(),
            model: model.into(),
            tier: Tier::SMALL,
            tokens_used: 100,
            cost: 0.01,
            latency_ms: 20,
            confidence: 0.8,
            reasoning: None,
            alternatives: vec![],
        }
    }

    #[test]
    fn test_key_is_stable_and_content_addressed() {
        assert_eq!(cache_key("prompt"), cache_key("prompt"));
        assert_ne!(cache_key("prompt"), cache_key("prompt "));
        assert_eq!(cache_key("prompt").len(), 64);
    }

    #[tokio::test]
    async fn test_hit_and_miss_accounting() {
        let cache = MemoryResponseCache::new(10);
        let key = cache_key("p");
        assert!(cache.get(&key).await.unwrap().is_none());
        cache.put(&key, response("m"), Duration::from_secs(60)).await.unwrap();
        let hit = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.response.model, "m");
        assert!(hit.expires_at > hit.cached_at);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryResponseCache::new(10);
        let key = cache_key("p");
        cache.put(&key, response("m"), Duration::ZERO).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_refreshed_entry_survives_stale_eviction() {
        let cache = MemoryResponseCache::new(10);
        let key = cache_key("p");
        cache.put(&key, response("old"), Duration::ZERO).await.unwrap();
        let seen_at = Utc::now();

        // Another task refreshes the entry after the expired read
        cache.put(&key, response("new"), Duration::from_secs(60)).await.unwrap();
        assert!(!cache.evict_expired(&key, seen_at));
        assert_eq!(cache.peek(&key).unwrap().response.model, "new");
        assert_eq!(cache.stats().evictions, 0);

        let later = Utc::now() + ChronoDuration::seconds(120);
        assert!(cache.evict_expired(&key, later));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryResponseCache::new(2);
        for i in 0..3 {
            cache
                .put(&cache_key(&i.to_string()), response(&format!("m{i}")), Duration::from_secs(60))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&cache_key("0")).is_none());
        assert!(cache.peek(&cache_key("2")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }
}
