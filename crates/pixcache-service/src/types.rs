use std::fmt;
use std::sync::Arc;

/// An opaque identifier of an owning context, such as a screen.
///
/// Every request is tied to a scope so that all requests of a screen can be cancelled, and all
/// of its cached images released, together. Callers are responsible for choosing keys that do not
/// collide; since the cache is invalidated by prefix, a scope key should also not be a prefix of
/// an unrelated scope key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(Arc<str>);

impl ScopeKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Derives the key of an independently releasable sub-bucket of this scope.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(Arc::from(format!("{}{suffix}", self.0)))
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key of a cached image: the scope key followed by the resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(scope: &ScopeKey, url: &str) -> Self {
        Self(Arc::from(format!("{scope}{url}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key belongs to the given scope, or to one of its sub-buckets.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl std::borrow::Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The box an image should be decoded into.
///
/// A zero dimension means "unknown"; see [`TargetSize::or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_unknown(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `self`, or `fallback` if any dimension of `self` is unknown.
    pub fn or(self, fallback: TargetSize) -> TargetSize {
        if self.is_unknown() { fallback } else { self }
    }
}

/// Removes all spaces from a resource identifier.
///
/// Resource lists frequently contain identifiers with stray whitespace, and keying or fetching
/// such identifiers verbatim would produce misses for otherwise identical resources.
pub fn normalize_url(url: &str) -> String {
    url.replace(' ', "")
}
