//! URL-keyed LRU cache with TTL and an optional per-entry byte cap, per
//! spec.md §4.4.
//!
//! Grounded on the teacher's `circuit_breaker::metrics::CircuitBreakerMetrics`
//! (atomic counters with a snapshot struct) for [`CacheStats`], and on
//! `dashmap` as the concurrent map primitive the teacher already depends on.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct DOMCacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    pub max_entry_bytes: Option<usize>,
}

impl Default for DOMCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(60),
            max_entry_bytes: None,
        }
    }
}

struct Entry {
    text: String,
    inserted_at: Instant,
    last_used: Instant,
}

/// Point-in-time counters. Mirrors the teacher's metrics-snapshot idiom.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size: usize,
}

pub struct DOMCache {
    config: DOMCacheConfig,
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DOMCache {
    pub fn new(config: DOMCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Insert or replace `url`'s cached DOM summary. Rejected (no-op) if
    /// `max_entry_bytes` is set and `text` exceeds it.
    pub fn set(&self, url: &str, text: String) -> bool {
        if let Some(max_bytes) = self.config.max_entry_bytes {
            if text.len() > max_bytes {
                return false;
            }
        }

        let now = Instant::now();
        self.entries.insert(
            url.to_string(),
            Entry {
                text,
                inserted_at: now,
                last_used: now,
            },
        );
        self.evict_if_over_capacity();
        true
    }

    fn evict_if_over_capacity(&self) {
        while self.entries.len() > self.config.max_entries {
            let lru_key = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            match lru_key {
                Some(key) => {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Return the cached text for `url` if present and not expired,
    /// refreshing its LRU position. Expired entries are removed.
    pub fn get(&self, url: &str) -> Option<String> {
        let expired = match self.entries.get(url) {
            Some(entry) => entry.inserted_at.elapsed() > self.config.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            self.entries.remove(url);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let text = self.entries.get_mut(url).map(|mut entry| {
            entry.last_used = Instant::now();
            entry.text.clone()
        });
        if text.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        text
    }

    pub fn has(&self, url: &str) -> bool {
        match self.entries.get(url) {
            Some(entry) => entry.inserted_at.elapsed() <= self.config.ttl,
            None => false,
        }
    }

    pub fn remove(&self, url: &str) {
        self.entries.remove(url);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            current_size: self.entries.len(),
        }
    }

    /// Remove every entry past its TTL; returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.inserted_at.elapsed() > self.config.ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &expired_keys {
            self.entries.remove(key);
        }
        expired_keys.len()
    }
}
