//! In-process TTL cache store

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::CacheStore;
use crate::{Result, cache_error};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Key/value store with per-entry TTL and a bounded entry count
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` values
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> Result<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|_| cache_error!("Cache read error"))?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| cache_error!("Cache write error"))?;

        let now = Instant::now();
        let initial = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(initial - entries.len())
    }

    /// Make room for one more entry: expired entries first, then the ones closest to expiry
    fn evict(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        if entries.len() < max_entries {
            return;
        }

        let overflow = entries.len() + 1 - max_entries;
        let mut by_expiry: Vec<(String, Instant)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        for (key, _) in by_expiry.into_iter().take(overflow) {
            entries.remove(&key);
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| cache_error!("Cache read error"))?;

        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| cache_error!("Cache write error"))?;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            Self::evict(&mut entries, self.max_entries);
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| cache_error!("Cache write error"))?;
        Ok(entries.remove(key).is_some())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| cache_error!("Cache write error"))?;

        let initial = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(initial - entries.len())
    }
}
