//! In-memory response cache with a fixed entry lifetime.
//!
//! Entries are opaque JSON values keyed by a caller-chosen string. An entry
//! older than the configured TTL reads as absent and is purged on lookup.
//!
//! Falsy keys and values (`null`, `false`, `0`, `""`) are never stored, so a
//! miss never has to be told apart from a cached "nothing".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

// =============================================================================
// Cache Entry
// =============================================================================

/// A stored response and the instant it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    /// Check if this entry has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() >= ttl
    }
}

/// JavaScript-style truthiness for cached values.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

// =============================================================================
// Invalidation
// =============================================================================

/// Which entries an invalidation removes.
#[derive(Debug, Clone)]
pub enum Invalidation {
    /// A single key
    Exact(String),
    /// Every key the pattern matches
    Pattern(Regex),
}

impl Invalidation {
    fn matches(&self, key: &str) -> bool {
        match self {
            Invalidation::Exact(k) => k == key,
            Invalidation::Pattern(re) => re.is_match(key),
        }
    }
}

impl From<&str> for Invalidation {
    fn from(key: &str) -> Self {
        Invalidation::Exact(key.to_string())
    }
}

impl From<String> for Invalidation {
    fn from(key: String) -> Self {
        Invalidation::Exact(key)
    }
}

impl From<Regex> for Invalidation {
    fn from(re: Regex) -> Self {
        Invalidation::Pattern(re)
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Statistics for the response cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    /// Entries dropped by expiry or invalidation
    pub evictions: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

// =============================================================================
// Response Cache
// =============================================================================

/// TTL cache for fetched responses.
///
/// Cloning is cheap and every clone shares the same entries, so one instance
/// built at startup can be handed to every consumer.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    stats: Arc<CacheStats>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            stats: Arc::new(CacheStats::default()),
            ttl: config.ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the stored value if it is still fresh.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the shard lock; a fresh set may have raced in
            if self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(self.ttl))
                .is_some()
            {
                debug!(key = key, "Cache entry expired");
                self.stats.record_evictions(1);
            }
        }

        self.stats.record_miss();
        None
    }

    /// Store `value` under `key`. Falsy keys or values are ignored.
    pub fn set(&self, key: &str, value: Value) {
        if key.is_empty() || is_falsy(&value) {
            return;
        }

        self.entries.insert(key.to_string(), CacheEntry::new(value));
        self.stats.record_insert();
    }

    /// True iff `get` would return a value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove one key or every key matching a pattern.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, target: impl Into<Invalidation>) -> usize {
        let target = target.into();
        let removed = match &target {
            Invalidation::Exact(key) => usize::from(self.entries.remove(key).is_some()),
            Invalidation::Pattern(_) => {
                let before = self.entries.len();
                self.entries.retain(|key, _| !target.matches(key));
                before.saturating_sub(self.entries.len())
            }
        };

        if removed > 0 {
            debug!(invalidation = ?target, removed = removed, "Cache invalidated");
            self.stats.record_evictions(removed);
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        let purged = before.saturating_sub(self.entries.len());

        if purged > 0 {
            debug!(purged = purged, remaining = self.entries.len(), "Cache cleanup");
            self.stats.record_evictions(purged);
        }
        purged
    }

    /// Number of stored entries, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// Tests
// =============================================================================
