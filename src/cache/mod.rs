//! Response cache for poll listings, details and results
//!
//! The cache is best-effort: a failing [`CacheStore`] degrades every read to
//! direct computation and every invalidation to a logged warning. Nothing in
//! this module returns a cache failure to the caller.

pub mod memory;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::Result;
use crate::config::CacheConfig;
use crate::types::PollId;

pub use memory::MemoryCache;

/// Key/value store with TTL and explicit delete
pub trait CacheStore: Send + Sync {
    /// Fetch a live value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove one key, reporting whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`
    fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Cache key layout
pub mod keys {
    use crate::types::PollId;

    /// Prefix shared by every listing page
    pub const LISTING_PREFIX: &str = "polls:list:";

    pub fn listing(page: usize) -> String {
        format!("{LISTING_PREFIX}{page}")
    }

    pub fn poll_detail(poll_id: PollId) -> String {
        format!("poll:{poll_id}:detail")
    }

    pub fn poll_results(poll_id: PollId) -> String {
        format!("poll:{poll_id}:results")
    }
}

/// Invalidation domain of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Detail and results of one poll
    Poll(PollId),
    /// Every listing page
    Listings,
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Store failures and undecodable entries, all recovered
    pub errors: u64,
}

/// Stored form of a value, stamped with its scope's generation at compute time
#[derive(Serialize, Deserialize)]
struct Tagged<T> {
    generation: u64,
    value: T,
}

/// Best-effort, typed wrapper around a [`CacheStore`]
///
/// Each invalidation bumps the generation of its [`Scope`] before deleting.
/// An entry whose stamp no longer matches is treated as a miss, so a value
/// computed before a write can never be served after that write's
/// invalidation, even if it reaches the store late.
pub struct ResponseCache {
    store: Option<Arc<dyn CacheStore>>,
    result_ttl: Duration,
    listing_ttl: Duration,
    generations: RwLock<HashMap<Scope, u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl ResponseCache {
    /// Wrap a store; a disabled configuration yields a cache that always misses
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store: config.enabled.then_some(store),
            result_ttl: Duration::from_secs(config.result_ttl_seconds),
            listing_ttl: Duration::from_secs(config.listing_ttl_seconds),
            generations: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            store: None,
            result_ttl: Duration::ZERO,
            listing_ttl: Duration::ZERO,
            generations: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// TTL applied to poll results
    pub fn result_ttl(&self) -> Duration {
        self.result_ttl
    }

    /// TTL applied to listings and poll details
    pub fn listing_ttl(&self) -> Duration {
        self.listing_ttl
    }

    /// Current generation of a scope (0 until first invalidated)
    pub fn generation(&self, scope: Scope) -> u64 {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self, scope: Scope) {
        let mut generations = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *generations.entry(scope).or_insert(0) += 1;
    }

    /// Read and decode a cached value; any failure counts as a miss
    pub fn get<T: DeserializeOwned>(&self, key: &str, scope: Scope) -> Option<T> {
        self.lookup(key, self.generation(scope))
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str, generation: u64) -> Option<T> {
        let store = self.store.as_ref()?;

        let raw = match store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "cache read failed, falling back to storage");
                return None;
            }
        };

        match serde_json::from_str::<Tagged<T>>(&raw) {
            Ok(tagged) if tagged.generation == generation => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache hit");
                Some(tagged.value)
            }
            Ok(tagged) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, stale = tagged.generation, current = generation, "stale cache entry");
                None
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                let _ = store.delete(key);
                None
            }
        }
    }

    /// Encode and store a value under the scope's current generation
    pub fn put<T: Serialize>(&self, key: &str, scope: Scope, value: &T, ttl: Duration) {
        self.store_at(key, self.generation(scope), value, ttl);
    }

    fn store_at<T: Serialize>(&self, key: &str, generation: u64, value: &T, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let result = serde_json::to_string(&Tagged { generation, value })
            .map_err(crate::Error::from)
            .and_then(|raw| store.set(key, raw, ttl));

        if let Err(e) = result {
            self.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Read-through: return the cached value or compute, store and return it
    ///
    /// The stored value carries the generation observed before `compute` ran.
    pub fn get_or_compute<T, F>(&self, key: &str, scope: Scope, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let generation = self.generation(scope);
        if let Some(cached) = self.lookup(key, generation) {
            return Ok(cached);
        }

        let fresh = compute()?;
        self.store_at(key, generation, &fresh, ttl);
        Ok(fresh)
    }

    /// Drop the detail and results entries of one poll
    pub fn invalidate_poll(&self, poll_id: PollId) {
        if !self.is_enabled() {
            return;
        }

        self.bump(Scope::Poll(poll_id));
        self.delete(&keys::poll_detail(poll_id));
        self.delete(&keys::poll_results(poll_id));
    }

    /// Drop every cached listing page
    pub fn invalidate_listings(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        self.bump(Scope::Listings);
        match store.delete_prefix(keys::LISTING_PREFIX) {
            Ok(removed) => tracing::debug!(removed, "poll listings invalidated"),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "listing invalidation failed");
            }
        }
    }

    fn delete(&self, key: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        if let Err(e) = store.delete(key) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key, error = %e, "cache invalidation failed");
        }
    }

    /// Snapshot of the hit/miss/error counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, cache_error};

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(cache_error!("connection refused"))
        }
        fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(cache_error!("connection refused"))
        }
        fn delete(&self, _key: &str) -> Result<bool> {
            Err(cache_error!("connection refused"))
        }
        fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
            Err(cache_error!("connection refused"))
        }
    }

    fn memory_cache() -> (Arc<MemoryCache>, ResponseCache) {
        let store = Arc::new(MemoryCache::new(64));
        let cache = ResponseCache::new(store.clone(), &CacheConfig::default());
        (store, cache)
    }

    #[test]
    fn test_read_through() {
        let (_, cache) = memory_cache();
        let ttl = Duration::from_secs(60);

        let scope = Scope::Poll(PollId(1));

        let first: u64 = cache.get_or_compute("k", scope, ttl, || Ok(7)).unwrap();
        let second: u64 = cache
            .get_or_compute("k", scope, ttl, || -> Result<u64> { panic!("should be cached") })
            .unwrap();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, errors: 0 });
    }

    #[test]
    fn test_invalidate_poll_and_listings() {
        let (store, cache) = memory_cache();
        let ttl = Duration::from_secs(60);
        let poll_id = PollId(3);

        let other = Scope::Poll(PollId(4));

        cache.put(&keys::poll_detail(poll_id), Scope::Poll(poll_id), &1u8, ttl);
        cache.put(&keys::poll_results(poll_id), Scope::Poll(poll_id), &2u8, ttl);
        cache.put(&keys::poll_results(PollId(4)), other, &3u8, ttl);
        cache.put(&keys::listing(1), Scope::Listings, &4u8, ttl);
        cache.put(&keys::listing(2), Scope::Listings, &5u8, ttl);

        cache.invalidate_poll(poll_id);
        cache.invalidate_listings();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(cache.get::<u8>(&keys::poll_results(PollId(4)), other), Some(3));
        assert_eq!(cache.generation(Scope::Poll(poll_id)), 1);
        assert_eq!(cache.generation(Scope::Listings), 1);
        assert_eq!(cache.generation(other), 0);
    }

    #[test]
    fn test_outage_degrades_to_compute() {
        let cache = ResponseCache::new(Arc::new(BrokenStore), &CacheConfig::default());

        let value: u64 = cache
            .get_or_compute("k", Scope::Listings, Duration::from_secs(60), || Ok(11))
            .unwrap();
        assert_eq!(value, 11);

        cache.invalidate_poll(PollId(1));
        cache.invalidate_listings();
        assert!(cache.stats().errors >= 4);
    }

    #[test]
    fn test_compute_errors_still_surface() {
        let (_, cache) = memory_cache();
        let result: Result<u64> =
            cache.get_or_compute("k", Scope::Listings, Duration::from_secs(60), || {
                Err(Error::not_found("Poll", 1))
            });
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let store = Arc::new(MemoryCache::new(8));
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(store.clone(), &config);

        cache.put("k", Scope::Listings, &1u8, Duration::from_secs(60));
        assert!(!cache.is_enabled());
        assert!(cache.get::<u8>("k", Scope::Listings).is_none());
        assert!(store.is_empty().unwrap());
        assert!(!ResponseCache::disabled().is_enabled());
    }

    #[test]
    fn test_undecodable_entry_is_discarded() {
        let (store, cache) = memory_cache();
        store.set("k", "not json".to_string(), Duration::from_secs(60)).unwrap();

        assert!(cache.get::<u64>("k", Scope::Listings).is_none());
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(cache.stats().errors, 1);
    }

    #[test]
    fn test_value_computed_before_invalidation_is_never_served() {
        let (store, cache) = memory_cache();
        let ttl = Duration::from_secs(60);
        let poll_id = PollId(1);
        let key = keys::poll_results(poll_id);
        let scope = Scope::Poll(poll_id);

        // A vote lands and invalidates while the reader is still computing
        let stale: u64 = cache
            .get_or_compute(&key, scope, ttl, || {
                cache.invalidate_poll(poll_id);
                Ok(1)
            })
            .unwrap();
        assert_eq!(stale, 1);

        // The late write reached the store but is not served
        assert!(store.get(&key).unwrap().is_some());
        assert!(cache.get::<u64>(&key, scope).is_none());

        let fresh: u64 = cache.get_or_compute(&key, scope, ttl, || Ok(2)).unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(cache.get::<u64>(&key, scope), Some(2));
    }

    #[test]
    fn test_listing_written_after_invalidation_is_stale() {
        let (_, cache) = memory_cache();
        let ttl = Duration::from_secs(60);
        let key = keys::listing(1);

        let before = cache.generation(Scope::Listings);
        cache.invalidate_listings();

        // Same write a slow reader makes with the generation it started with
        cache.store_at(&key, before, &3u8, ttl);
        assert!(cache.get::<u8>(&key, Scope::Listings).is_none());

        cache.put(&key, Scope::Listings, &4u8, ttl);
        assert_eq!(cache.get::<u8>(&key, Scope::Listings), Some(4));
    }
}
