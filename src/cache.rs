use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// Generic key → value store where every entry carries its own time-to-live.
///
/// Expiry is lazy on `get` and eager in `sweep`, which the engine runs
/// periodically so entries that are never re-read still get evicted. The
/// handle is cheap to clone; all clones share the same storage.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(self.stored_at) < ttl,
            Err(_) => true, // A TTL too large for chrono never expires
        }
    }
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        TtlCache {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        TtlCache::new()
    }
}

impl<K, V> TtlCache<K, V> {
    pub fn new() -> Self {
        TtlCache {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Removes every expired entry, returning how many were evicted.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Returns the stored value iff its TTL has not elapsed. A stale entry is
    /// removed on the spot and treated as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(Utc::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a value, overwriting any existing entry for the key.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Utc::now(),
                ttl,
            },
        );
    }
}

/// Spawns the periodic eviction task. The returned handle must be aborted on
/// engine shutdown.
#[instrument(skip(cache))]
pub fn spawn_sweeper<K, V>(cache: TtlCache<K, V>, period: Duration) -> JoinHandle<()>
where
    K: Send + 'static,
    V: Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // First tick fires immediately
        loop {
            interval.tick().await;
            let evicted = cache.sweep();
            if evicted > 0 {
                debug!("🧹 Swept {} expired cache entries", evicted);
            }
        }
    })
}

/// Builds a cache key from a coordinate quantized to six decimal places
/// (≈ 0.11 m), so near-identical repeated lookups hit the same entry.
pub fn quantized_key(prefix: &str, lat: f64, lng: f64) -> String {
    format!("{}:{:.6}:{:.6}", prefix, lat, lng)
}
