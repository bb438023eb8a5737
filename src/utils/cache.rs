//! In-memory response cache for search and extraction results.
//!
//! Entries are keyed by an MD5 fingerprint of the request shape
//! (mode, content, parameters), expire after a TTL and are bounded in
//! number with oldest-first eviction. Only successful responses are ever
//! stored; nothing is persisted across restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::config::CacheConfig;
use crate::utils::Clock;

/// Values that know whether they represent a successful response
pub trait Cacheable {
    /// Whether this value may be stored in the cache
    fn is_cacheable(&self) -> bool;
}

impl<T, E> Cacheable for Result<T, E> {
    fn is_cacheable(&self) -> bool {
        self.is_ok()
    }
}

/// A single cached response
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Request fingerprint
    pub key: String,

    /// The cached (successful) value
    pub value: T,

    /// When the entry was stored (epoch ms)
    pub created_at: u64,

    /// Number of hits served from this entry
    pub access_count: u64,
}

/// Statistics about the cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_ms: u64,
    /// Creation time of the oldest live entry
    pub oldest_entry: Option<u64>,
    /// Creation time of the newest live entry
    pub newest_entry: Option<u64>,
}

/// Build a stable fingerprint for a request
pub fn cache_key(mode: &str, content: &str, parameters: &str) -> String {
    let input = format!("{}|{}|{}", mode, content.trim(), parameters);
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Bounded TTL cache of successful responses
#[derive(Debug)]
pub struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Cacheable> ResponseCache<T> {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &CacheEntry<T>, now: u64) -> bool {
        now.saturating_sub(entry.created_at) > self.config.ttl_ms
    }

    /// Store a response; unsuccessful responses are ignored
    pub fn cache_response(&self, key: &str, value: T) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }
        if !value.is_cacheable() {
            tracing::debug!("Not caching unsuccessful response for {}", key);
            return;
        }

        let now = self.clock.now_ms();
        let mut entries = self.entries();

        entries.retain(|_, entry| now.saturating_sub(entry.created_at) <= self.config.ttl_ms);

        if !entries.contains_key(key) {
            while entries.len() >= self.config.max_size {
                let oldest = entries
                    .values()
                    .min_by_key(|entry| entry.created_at)
                    .map(|entry| entry.key.clone());
                match oldest {
                    Some(oldest) => {
                        tracing::debug!("Evicting oldest cache entry {}", oldest);
                        entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                created_at: now,
                access_count: 0,
            },
        );
        tracing::debug!("Cached response: {}", key);
    }

    /// Look up a live entry, counting the access
    pub fn get_cached_response(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        let now = self.clock.now_ms();
        let mut entries = self.entries();

        let expired = match entries.get(key) {
            None => {
                tracing::debug!("Cache MISS: {}", key);
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            tracing::debug!("Cache expired: {}", key);
            entries.remove(key);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.access_count += 1;
        tracing::debug!("Cache HIT: {} (hits: {})", key, entry.access_count);
        Some(entry.value.clone())
    }

    /// Access count of a live entry
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.entries().get(key).map(|entry| entry.access_count)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let created: Vec<u64> = self
            .entries()
            .values()
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.created_at)
            .collect();

        CacheStats {
            size: created.len(),
            max_size: self.config.max_size,
            ttl_ms: self.config.ttl_ms,
            oldest_entry: created.iter().copied().min(),
            newest_entry: created.iter().copied().max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::time::Duration;

    type Response = Result<String, String>;

    fn cache_with(max_size: usize) -> (ResponseCache<Response>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = CacheConfig {
            max_size,
            ..CacheConfig::default()
        };
        (ResponseCache::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key("search", "deep learning", "max=10");
        let b = cache_key("search", "deep learning ", "max=10");
        let c = cache_key("search", "deep learning", "max=20");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_success_round_trip() {
        let (cache, _) = cache_with(10);
        cache.cache_response("k", Ok("value".to_string()));

        assert_eq!(cache.get_cached_response("k"), Some(Ok("value".to_string())));
        assert_eq!(cache.access_count("k"), Some(1));
    }

    #[test]
    fn test_error_responses_are_not_cached() {
        let (cache, _) = cache_with(10);
        cache.cache_response("k", Err("boom".to_string()));

        assert_eq!(cache.get_cached_response("k"), None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let (cache, clock) = cache_with(10);
        cache.cache_response("k", Ok("value".to_string()));

        clock.advance(Duration::from_secs(30 * 60));
        assert!(cache.get_cached_response("k").is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get_cached_response("k"), None);
    }

    #[test]
    fn test_oldest_entry_is_evicted() {
        let (cache, clock) = cache_with(2);
        cache.cache_response("a", Ok("1".to_string()));
        clock.advance(Duration::from_millis(10));
        cache.cache_response("b", Ok("2".to_string()));
        clock.advance(Duration::from_millis(10));
        cache.cache_response("c", Ok("3".to_string()));

        assert_eq!(cache.get_cached_response("a"), None);
        assert!(cache.get_cached_response("b").is_some());
        assert!(cache.get_cached_response("c").is_some());
    }

    #[test]
    fn test_stats() {
        let (cache, clock) = cache_with(5);
        assert_eq!(cache.stats().oldest_entry, None);

        cache.cache_response("a", Ok("1".to_string()));
        clock.advance(Duration::from_secs(1));
        cache.cache_response("b", Ok("2".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 5);
        assert_eq!(stats.oldest_entry, Some(1_000_000));
        assert_eq!(stats.newest_entry, Some(1_001_000));
    }

    #[test]
    fn test_disabled_cache() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache: ResponseCache<Response> = ResponseCache::new(config, clock);
        cache.cache_response("k", Ok("v".to_string()));
        assert_eq!(cache.get_cached_response("k"), None);
    }
}
