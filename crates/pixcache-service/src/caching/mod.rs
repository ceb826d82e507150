//! In-memory caching of decoded artifacts.

use std::fmt;

mod tiered;

pub use tiered::TieredCache;

/// Something that can be kept in a [`TieredCache`].
pub trait Artifact: Send + Sync + 'static {
    /// The "cost" of keeping this artifact in the strong tier, usually its byte footprint.
    ///
    /// This must not change for the lifetime of the artifact, not even after it was released.
    fn weight(&self) -> u64;

    /// Eagerly frees the resources held by this artifact.
    ///
    /// This is called when a cache entry is invalidated, instead of waiting for the last
    /// reference to go away.
    fn release(&self) {}

    /// Whether [`release`](Self::release) was called. Released artifacts are cache misses.
    fn is_released(&self) -> bool {
        false
    }
}

/// Diagnostic counters of a [`TieredCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    /// Entries removed from the strong tier, by eviction or invalidation.
    pub evictions: u64,
    /// The current weight of the strong tier.
    pub size: u64,
    pub max_size: u64,
    pub strong_entries: usize,
    pub weak_entries: usize,
}

impl CacheStats {
    /// The percentage of lookups that were hits, rounded down.
    pub fn hit_rate(&self) -> u64 {
        let accesses = self.hits + self.misses;
        if accesses == 0 {
            0
        } else {
            100 * self.hits / accesses
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageCache[maxSize={},hits={},misses={},hitRate={}%,curSize={},evictionCount={}]",
            self.max_size,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.size,
            self.evictions
        )
    }
}
