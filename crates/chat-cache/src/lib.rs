//! TTL-scoped in-memory caches for the chat engine.
//!
//! Each cache namespace is an independent `TtlCache` with its own TTL. The TTL
//! is a safety net: callers are expected to invalidate explicitly on mutating
//! actions, and a low-frequency sweep purges anything past a generous max age
//! to bound memory over long-lived sessions.
//!
//! Timestamps use `tokio::time::Instant` so tests can drive expiry with
//! paused time instead of sleeping.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached payload with its storage timestamp.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
}

/// A single TTL-scoped key/value namespace.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a namespace with the given TTL.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The namespace TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry. An entry older than the TTL reads as absent and
    /// is evicted on the spot.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.payload.clone()),
            Some(_) => {
                debug!(cache = self.name, "evicting stale entry");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a payload with the current timestamp.
    pub fn set(&self, key: K, payload: V) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop one entry, returning whether it existed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Drop every entry whose key matches the predicate, returning the count.
    pub fn invalidate_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !pred(key));
        before - entries.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Sweep hook: purge entries older than `max_age`, returning the count.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < max_age);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(cache = self.name, purged, "sweep purged entries");
        }
        purged
    }

    /// Number of entries, including not-yet-evicted stale ones.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the namespace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64) -> TtlCache<String, u32> {
        TtlCache::new("test", Duration::from_secs(ttl_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_hits() {
        let cache = cache(60);
        cache.set("k".to_string(), 7);
        assert_eq!(cache.get(&"k".to_string()), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_past_ttl_reads_as_absent_and_is_evicted() {
        let cache = cache(60);
        cache.set("k".to_string(), 7);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.get(&"k".to_string()), None);
        // Lazy eviction removed the stale entry.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_the_clock() {
        let cache = cache(60);
        cache.set("k".to_string(), 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.set("k".to_string(), 2);
        tokio::time::advance(Duration::from_secs(50)).await;

        // 100s since the first set, but only 50s since the rewrite.
        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_removes_entry() {
        let cache = cache(60);
        cache.set("k".to_string(), 1);
        assert!(cache.invalidate(&"k".to_string()));
        assert!(!cache.invalidate(&"k".to_string()));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_where_drops_matching_keys() {
        let cache = cache(60);
        cache.set("a-1".to_string(), 1);
        cache.set("a-2".to_string(), 2);
        cache.set("b-1".to_string(), 3);

        let dropped = cache.invalidate_where(|k| k.starts_with("a-"));
        assert_eq!(dropped, 2);
        assert_eq!(cache.get(&"b-1".to_string()), Some(3));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_respects_max_age_not_ttl() {
        let cache = cache(60);
        cache.set("old".to_string(), 1);
        tokio::time::advance(Duration::from_secs(120)).await;
        cache.set("new".to_string(), 2);

        // Stale by TTL but under the sweep bound: stays in the map.
        assert_eq!(cache.purge_older_than(Duration::from_secs(600)), 0);
        assert_eq!(cache.len(), 2);

        // Past the sweep bound: goes away even without a read.
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(cache.purge_older_than(Duration::from_secs(600)), 2);
        assert!(cache.is_empty());
    }
}
