use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;

use super::{Artifact, CacheStats};
use crate::config::InMemoryCacheConfig;
use crate::types::CacheKey;

struct Tiers<T> {
    /// Strongly retained entries, in access order.
    strong: LruCache<CacheKey, Arc<T>>,
    /// Entries demoted from the strong tier.
    ///
    /// These stay reachable for as long as anybody else holds on to the artifact, for example a
    /// slot that still displays it.
    weak: HashMap<CacheKey, Weak<T>>,
    /// The summed weight of the strong tier.
    size: u64,
    hits: u64,
    misses: u64,
    puts: u64,
    evictions: u64,
}

/// A size-bounded, two-tier in-memory cache.
///
/// The strong tier holds artifacts up to a configured total weight, evicting the least recently
/// accessed entries first. Evicted entries are demoted into the weak tier, which does not keep
/// them alive. A weak entry whose artifact was dropped or released is a miss and is removed
/// lazily on lookup.
///
/// Hits in the weak tier are not promoted back into the strong tier.
///
/// All operations run under a single lock and never block on I/O.
pub struct TieredCache<T> {
    config: InMemoryCacheConfig,
    tiers: Mutex<Tiers<T>>,
}

impl<T: Artifact> TieredCache<T> {
    pub fn new(config: InMemoryCacheConfig) -> Self {
        Self {
            config,
            tiers: Mutex::new(Tiers {
                strong: LruCache::unbounded(),
                weak: HashMap::new(),
                size: 0,
                hits: 0,
                misses: 0,
                puts: 0,
                evictions: 0,
            }),
        }
    }

    /// Looks up `key`, first in the strong tier and then in the weak tier.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let mut tiers = self.tiers.lock();

        if let Some(value) = tiers.strong.get(key) {
            if !value.is_released() {
                let value = Arc::clone(value);
                tiers.hits += 1;
                metric!(counter("cache.access") += 1, "result" => "hit", "tier" => "strong");
                return Some(value);
            }
            if let Some(released) = tiers.strong.pop(key) {
                tiers.size -= released.weight();
            }
        }

        if let Some(weak) = tiers.weak.get(key) {
            match weak.upgrade() {
                Some(value) if !value.is_released() => {
                    tiers.hits += 1;
                    metric!(counter("cache.access") += 1, "result" => "hit", "tier" => "weak");
                    return Some(value);
                }
                _ => {
                    tracing::trace!(key, "Dropping reclaimed weak cache entry");
                    tiers.weak.remove(key);
                }
            }
        }

        tiers.misses += 1;
        metric!(counter("cache.access") += 1, "result" => "miss");
        None
    }

    /// Inserts `value` into the strong tier, returning the entry it replaced.
    ///
    /// If this pushes the strong tier over its capacity, the least recently accessed entries are
    /// evicted until it fits again.
    pub fn put(&self, key: CacheKey, value: Arc<T>) -> Option<Arc<T>> {
        let weight = value.weight();
        let mut tiers = self.tiers.lock();

        tiers.puts += 1;
        tiers.weak.remove(&key);
        tiers.size += weight;
        let previous = tiers.strong.put(key, value);
        if let Some(previous) = &previous {
            tiers.size -= previous.weight();
        }

        self.trim_to_size(&mut tiers);
        previous
    }

    fn trim_to_size(&self, tiers: &mut Tiers<T>) {
        while tiers.size > self.config.strong_capacity {
            let Some((key, value)) = tiers.strong.pop_lru() else {
                break;
            };
            tiers.size -= value.weight();
            tiers.evictions += 1;
            metric!(counter("cache.evictions") += 1);

            if self.config.demote_evicted {
                tracing::trace!(key = key.as_str(), "Demoting cache entry to the weak tier");
                tiers.weak.insert(key, Arc::downgrade(&value));
            }
        }
    }

    /// Removes every entry whose key starts with `prefix` from both tiers.
    ///
    /// Artifacts that are still alive are released explicitly. Returns the number of removed
    /// entries.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut tiers = self.tiers.lock();

        let strong_keys: Vec<_> = tiers
            .strong
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        let mut removed = 0;
        for key in strong_keys {
            if let Some(value) = tiers.strong.pop(&key) {
                value.release();
                tiers.size -= value.weight();
                tiers.evictions += 1;
                removed += 1;
            }
        }

        tiers.weak.retain(|key, weak| {
            if !key.starts_with(prefix) {
                return true;
            }
            if let Some(value) = weak.upgrade() {
                value.release();
            }
            removed += 1;
            false
        });

        tracing::trace!(prefix, removed, "Invalidated cache entries");
        metric!(counter("cache.invalidated") += removed as i64);
        removed
    }

    /// Removes weak entries whose artifacts are gone, returning how many were removed.
    pub fn purge_reclaimed(&self) -> usize {
        let mut tiers = self.tiers.lock();
        let before = tiers.weak.len();
        tiers
            .weak
            .retain(|_, weak| weak.upgrade().is_some_and(|value| !value.is_released()));
        before - tiers.weak.len()
    }

    /// Drops all entries of both tiers without releasing them.
    pub fn clear(&self) {
        let mut tiers = self.tiers.lock();
        tiers.strong.clear();
        tiers.weak.clear();
        tiers.size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let tiers = self.tiers.lock();
        CacheStats {
            hits: tiers.hits,
            misses: tiers.misses,
            puts: tiers.puts,
            evictions: tiers.evictions,
            size: tiers.size,
            max_size: self.config.strong_capacity,
            strong_entries: tiers.strong.len(),
            weak_entries: tiers.weak.len(),
        }
    }
}

impl<T: Artifact> fmt::Display for TieredCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stats().fmt(f)
    }
}

impl<T: Artifact> fmt::Debug for TieredCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
