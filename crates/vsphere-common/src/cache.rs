//! Bounded, expiring cache for downstream API clients
//!
//! Clients are keyed by a SHA-256 digest of the credential blob so the blob
//! itself is never held as a map key. The cache is a resource-reuse
//! optimisation only: a miss always rebuilds the client.

use std::time::{Duration, Instant};

use aws_lc_rs::digest::{digest, SHA256};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Default number of cached clients
pub const DEFAULT_CLIENT_CACHE_CAPACITY: usize = 10;

/// Default lifetime of a cached client
pub const DEFAULT_CLIENT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cache key for a credential blob
pub fn credential_key(credential: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, credential).as_ref())
}

/// Client cache collaborator
///
/// Implementations must be safe under concurrent get/insert.
pub trait ClientCache<V>: Send + Sync {
    /// Look up a live entry
    fn get(&self, key: &str) -> Option<V>;

    /// Store an entry, evicting as needed
    fn insert(&self, key: String, value: V);
}

/// Cache that never stores anything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClientCache;

impl<V> ClientCache<V> for NoopClientCache {
    fn get(&self, _key: &str) -> Option<V> {
        None
    }

    fn insert(&self, _key: String, _value: V) {}
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: Instant,
}

/// Least-recently-used cache whose entries expire after a fixed TTL
pub struct ExpiringClientCache<V> {
    entries: DashMap<String, Entry<V>>,
    // Serializes eviction with insertion so the capacity bound holds
    insert_lock: Mutex<()>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> ExpiringClientCache<V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            insert_lock: Mutex::new(()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    debug!(cache_key = %key, "evicting least recently used client");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl<V: Clone + Send + Sync> ClientCache<V> for ExpiringClientCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
            return None;
        }
        entry.last_used = now;
        Some(entry.value.clone())
    }

    fn insert(&self, key: String, value: V) {
        let _guard = self.insert_lock.lock();
        let now = Instant::now();
        if !self.entries.contains_key(&key) {
            self.evict(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
                last_used: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_credential_same_key() {
        assert_eq!(credential_key(b"kubeconfig-a"), credential_key(b"kubeconfig-a"));
        assert_ne!(credential_key(b"kubeconfig-a"), credential_key(b"kubeconfig-b"));
        assert!(!credential_key(b"kubeconfig-a").contains("kubeconfig"));
    }

    #[test]
    fn returns_inserted_value() {
        let cache = ExpiringClientCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ExpiringClientCache::new(2, Duration::ZERO);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = ExpiringClientCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict_others() {
        let cache = ExpiringClientCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn noop_cache_never_hits() {
        let cache = NoopClientCache;
        ClientCache::<u32>::insert(&cache, "a".to_string(), 1);
        assert_eq!(ClientCache::<u32>::get(&cache, "a"), None);
    }

    #[test]
    fn concurrent_inserts_stay_bounded() {
        let cache = std::sync::Arc::new(ExpiringClientCache::new(4, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(format!("{t}-{i}"), i);
                        let _ = cache.get(&format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 4);
    }
}
