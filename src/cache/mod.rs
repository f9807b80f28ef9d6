//! Caches
//!
//! - [`TtlCache`] - typed map with per-entry expiry and a byte budget
//! - [`EntityCache`] - one typed cache per entity kind (models, configurations,
//!   available options, validation results)
//! - [`sweeper`] - background task that drops expired entries
//!
//! Every read re-checks expiry, so a missed sweep only delays memory
//! reclamation. When an insert would exceed the byte budget the entry with
//! the oldest access time is evicted first (linear scan).

mod entity;
pub mod sweeper;

pub use entity::EntityCache;
pub use sweeper::{spawn_sweeper, SweeperHandle};

use crate::error::Result;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Counters exposed by every cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size_bytes: usize,
    pub key_count: usize,
    pub hit_rate: f64,
}

impl CacheStats {
    /// Sum of several snapshots; the hit rate is recomputed
    pub fn combine<'a, I: IntoIterator<Item = &'a CacheStats>>(stats: I) -> CacheStats {
        let mut total = CacheStats::default();
        for s in stats {
            total.hits += s.hits;
            total.misses += s.misses;
            total.sets += s.sets;
            total.deletes += s.deletes;
            total.evictions += s.evictions;
            total.expirations += s.expirations;
            total.size_bytes += s.size_bytes;
            total.key_count += s.key_count;
        }
        total.hit_rate = hit_rate(total.hits, total.misses);
        total
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let lookups = hits + misses;
    if lookups == 0 {
        0.0
    } else {
        hits as f64 / lookups as f64
    }
}

/// A cache the sweeper can clean
pub trait Sweepable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop expired entries, returning how many were removed
    fn sweep_expired(&self) -> usize;
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    size: usize,
    /// Microseconds since the cache epoch
    last_access: AtomicU64,
}

/// Typed cache with TTL expiry and LRU eviction under a byte budget
pub struct TtlCache<K, V> {
    name: String,
    entries: RwLock<HashMap<K, Entry<V>>>,
    default_ttl: Duration,
    max_bytes: usize,
    epoch: Instant,
    size_bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("default_ttl", &self.default_ttl)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Serialize,
{
    pub fn new(name: &str, default_ttl: Duration, max_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_bytes,
            epoch: Instant::now(),
            size_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live value for `key`; expired entries count as misses
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let entries = self.entries.read()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                entry
                    .last_access
                    .store(self.micros_since_epoch(now), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.clone()))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub fn set(&self, key: K, value: V) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        let size = approximate_size(&value) + std::mem::size_of::<K>();
        if size > self.max_bytes {
            debug!(cache = %self.name, size, "Entry exceeds cache budget, not stored");
            return Ok(());
        }

        let now = Instant::now();
        let mut entries = self.entries.write()?;
        if let Some(old) = entries.remove(&key) {
            self.size_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        while self.size_bytes.load(Ordering::Relaxed) + size > self.max_bytes {
            if !self.evict_lru(&mut entries) {
                break;
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                size,
                last_access: AtomicU64::new(self.micros_since_epoch(now)),
            },
        );
        self.size_bytes.fetch_add(size, Ordering::Relaxed);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove one key; returns whether it was present
    pub fn invalidate(&self, key: &K) -> Result<bool> {
        let mut entries = self.entries.write()?;
        match entries.remove(key) {
            Some(entry) => {
                self.size_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                self.deletes.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every key matching a predicate
    pub fn invalidate_where<F: Fn(&K) -> bool>(&self, matches: F) -> Result<usize> {
        let mut entries = self.entries.write()?;
        let doomed: Vec<K> = entries.keys().filter(|k| matches(k)).cloned().collect();
        for key in &doomed {
            if let Some(entry) = entries.remove(key) {
                self.size_bytes.fetch_sub(entry.size, Ordering::Relaxed);
            }
        }
        self.deletes
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        Ok(doomed.len())
    }

    pub fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write()?;
        let removed = entries.len();
        entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write()?;
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                self.size_bytes.fetch_sub(entry.size, Ordering::Relaxed);
            }
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        Ok(expired.len())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            key_count: self.len(),
            hit_rate: hit_rate(hits, misses),
        }
    }

    fn evict_lru(&self, entries: &mut HashMap<K, Entry<V>>) -> bool {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone());
        match oldest.and_then(|key| entries.remove(&key)) {
            Some(entry) => {
                self.size_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn micros_since_epoch(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_micros() as u64
    }
}

impl<V> TtlCache<String, V>
where
    V: Clone + Serialize,
{
    /// Remove keys matching a glob (`*` any run, `?` one character)
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = glob_to_regex(pattern)?;
        self.invalidate_where(|key| regex.is_match(key))
    }
}

impl<K, V> Sweepable for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Serialize + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn sweep_expired(&self) -> usize {
        self.purge_expired().unwrap_or(0)
    }
}

/// Compile a key glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{}$", escaped))
        .map_err(|e| crate::error::Error::Config(format!("invalid key pattern '{}': {}", pattern, e)))
}

fn approximate_size<V: Serialize>(value: &V) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(std::mem::size_of::<V>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_bytes: usize) -> TtlCache<String, String> {
        TtlCache::new("test", Duration::from_secs(60), max_bytes)
    }

    #[test]
    fn test_get_set_and_stats() {
        let cache = cache(1024 * 1024);
        assert_eq!(cache.get(&"a".to_string()).unwrap(), None);
        cache.set("a".into(), "value".into()).unwrap();
        assert_eq!(cache.get(&"a".to_string()).unwrap(), Some("value".into()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.key_count, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = cache(1024);
        cache
            .set_with_ttl("a".into(), "v".into(), Duration::from_millis(0))
            .unwrap();
        assert_eq!(cache.get(&"a".to_string()).unwrap(), None);
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_under_budget() {
        // Each entry weighs the JSON string (len + 2 quotes) plus the key size
        let entry = approximate_size(&"x".repeat(10)) + std::mem::size_of::<String>();
        let cache = cache(entry * 2);
        cache.set("a".into(), "x".repeat(10)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b".into(), "x".repeat(10)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        // Touch "a" so "b" becomes the least recently used
        cache.get(&"a".to_string()).unwrap();
        cache.set("c".into(), "x".repeat(10)).unwrap();

        assert!(cache.get(&"a".to_string()).unwrap().is_some());
        assert!(cache.get(&"b".to_string()).unwrap().is_none());
        assert!(cache.get(&"c".to_string()).unwrap().is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_pattern_invalidation() {
        let cache = cache(1024 * 1024);
        cache.set("validation:m1:abc".into(), "1".into()).unwrap();
        cache.set("validation:m2:abc".into(), "2".into()).unwrap();
        cache.set("pricing:m1:abc".into(), "3".into()).unwrap();
        assert_eq!(cache.invalidate_pattern("validation:m1:*").unwrap(), 1);
        assert_eq!(cache.invalidate_pattern("*:abc").unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().deletes, 3);
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let regex = glob_to_regex("model.v1?").unwrap();
        assert!(regex.is_match("model.v12"));
        assert!(!regex.is_match("modelXv12"));
    }

    #[test]
    fn test_combined_stats() {
        let a = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        let b = CacheStats {
            hits: 1,
            misses: 3,
            ..Default::default()
        };
        let total = CacheStats::combine([&a, &b]);
        assert_eq!(total.hits, 4);
        assert!((total.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
