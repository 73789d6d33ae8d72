// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! LRU match cache.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

/// A cached match: which pattern answered `path` and the parameters it
/// captured.
#[derive(Debug, Clone)]
pub struct CachedMatch {
    /// The pattern string that matched.
    pub pattern: String,
    /// Captured parameters, by name.
    pub params: HashMap<String, String>,
}

/// Thread-safe LRU cache from path to the route that answered it.
///
/// Wrapped in a `tokio::sync::Mutex` because `lru::LruCache` mutates its
/// internal list on reads (`get` promotes the entry), so even lookups
/// need exclusive access — matching.
pub struct MatchCache {
    inner: Mutex<LruCache<String, CachedMatch>>,
}

impl MatchCache {
    /// Builds a cache with the given capacity.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up a previously cached match for `path`.
    pub async fn get(&self, path: &str) -> Option<CachedMatch> {
        let mut cache = self.inner.lock().await;
        cache.get(path).cloned()
    }

    /// Publishes a match for `path`, possibly evicting the least recently
    /// used entry.
    pub async fn put(&self, path: String, cached: CachedMatch) {
        let mut cache = self.inner.lock().await;
        cache.put(path, cached);
    }

    /// Invalidates the entire cache.
    pub async fn invalidate(&self) {
        let mut cache = self.inner.lock().await;
        cache.clear();
    }
}
