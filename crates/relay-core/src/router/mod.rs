// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Router: registers route patterns, matches paths with longest-pattern-
//! wins semantics, and caches matches.

mod cache;
mod pattern;
mod permission;

pub use cache::{CachedMatch, MatchCache};
pub use pattern::{Pattern, PatternError};
pub use permission::{AuthContext, AuthorizedHandler, FnHandler, Handler};

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, instrument};

use crate::error::RelayError;
use crate::identity::Level;
use crate::message::{Message, RouteOptions};

/// Errors raised by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No entry in the route table matches the given path.
    #[error("no route matches path {0:?}")]
    NotFound(String),

    /// A pattern was registered twice; at most one entry per pattern is
    /// allowed on a given router.
    #[error("pattern {0:?} is already registered")]
    Duplicate(String),

    /// The pattern string failed to compile.
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    /// Attempted to unregister a pattern that was never registered.
    #[error("pattern {0:?} is not registered")]
    NotRegistered(String),
}

/// Metadata attached to a registered route.
#[derive(Clone, Default)]
pub struct RouteMetadata {
    /// Minimum permission level required to invoke the handler.
    pub required: Option<Level>,
    /// Named scope checked against the caller's resolved profile, if any.
    pub scope: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Advisory priority (used by listener policies, not by route matching).
    pub priority: Option<i32>,
}

struct RouteEntry {
    pattern: Pattern,
    handler: Arc<dyn Handler>,
    metadata: RouteMetadata,
    seq: u64,
}

/// A route table with longest-pattern-wins matching and an LRU match
/// cache.
///
/// State machine per route: `ABSENT → REGISTERED → REMOVED`. `Router` owns its table and cache exclusively.
pub struct Router {
    entries: DashMap<String, RouteEntry>,
    cache: MatchCache,
    next_seq: AtomicU64,
    identity: AsyncRwLock<Option<AuthContext>>,
}

/// Result of a successful match.
pub struct Matched {
    /// The pattern string that matched.
    pub pattern: String,
    /// Parameters captured from the path.
    pub params: HashMap<String, String>,
    /// The handler registered for that pattern.
    pub handler: Arc<dyn Handler>,
    /// The route's metadata.
    pub metadata: RouteMetadata,
}

impl Router {
    /// Builds a router whose match cache holds up to `cache_capacity`
    /// entries.
    #[must_use]
    pub fn new(cache_capacity: NonZeroUsize) -> Self {
        Self {
            entries: DashMap::new(),
            cache: MatchCache::new(cache_capacity),
            next_seq: AtomicU64::new(0),
            identity: AsyncRwLock::new(None),
        }
    }

    /// Binds the identity context this router's owning subsystem holds.
    ///
    /// Once set, [`Self::route`] wraps any matched handler whose
    /// `metadata.required` is set in an [`AuthorizedHandler`] built from
    /// this context, enforcing §4.2 permission checks without the caller
    /// having to hand-assemble one itself.
    pub async fn set_identity(&self, ctx: AuthContext) {
        *self.identity.write().await = Some(ctx);
    }

    /// Registers `handler` under `pattern`. Fails if `pattern` is already
    /// registered. Invalidates the match cache
    ///.
    #[instrument(skip(self, handler))]
    pub async fn register(
        &self,
        pattern_str: &str,
        handler: Arc<dyn Handler>,
        metadata: RouteMetadata,
    ) -> Result<(), RouterError> {
        if self.entries.contains_key(pattern_str) {
            return Err(RouterError::Duplicate(pattern_str.to_string()));
        }
        let pattern = Pattern::compile(pattern_str)?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            pattern_str.to_string(),
            RouteEntry {
                pattern,
                handler,
                metadata,
                seq,
            },
        );
        self.cache.invalidate().await;
        debug!(pattern = pattern_str, "route registered");
        Ok(())
    }

    /// Removes the route registered under `pattern`. Invalidates the
    /// match cache.
    #[instrument(skip(self))]
    pub async fn unregister(&self, pattern_str: &str) -> Result<(), RouterError> {
        self.entries
            .remove(pattern_str)
            .ok_or_else(|| RouterError::NotRegistered(pattern_str.to_string()))?;
        self.cache.invalidate().await;
        debug!(pattern = pattern_str, "route unregistered");
        Ok(())
    }

    /// Returns `true` if `pattern` is currently registered.
    #[must_use]
    pub fn is_registered(&self, pattern: &str) -> bool {
        self.entries.contains_key(pattern)
    }

    /// Matches `path` against the route table.
    ///
    /// Consults the LRU cache first; on a miss, scans every entry,
    /// selects the longest matching pattern (earliest-registered on a
    /// length tie), and publishes the result to the cache.
    pub async fn find_match(&self, path: &str) -> Option<Matched> {
        if let Some(cached) = self.cache.get(path).await {
            if let Some(entry) = self.entries.get(&cached.pattern) {
                return Some(Matched {
                    pattern: cached.pattern,
                    params: cached.params,
                    handler: entry.handler.clone(),
                    metadata: entry.metadata.clone(),
                });
            }
            // Entry vanished between caching and lookup (raced an
            // unregister); fall through to a fresh scan.
        }

        let mut best: Option<(&str, HashMap<String, String>, u64)> = None;
        for entry in &self.entries {
            let Some(params) = entry.pattern.matches(path) else {
                continue;
            };
            let candidate_len = entry.pattern.length();
            let better = match &best {
                None => true,
                Some((best_pattern, _, best_seq)) => {
                    let best_len = best_pattern.len();
                    candidate_len > best_len || (candidate_len == best_len && entry.seq < *best_seq)
                }
            };
            if better {
                best = Some((entry.key().as_str(), params, entry.seq));
            }
        }

        let (pattern, params, _) = best?;
        let pattern = pattern.to_string();
        let entry = self.entries.get(&pattern)?;
        self.cache
            .put(
                path.to_string(),
                CachedMatch {
                    pattern: pattern.clone(),
                    params: params.clone(),
                },
            )
            .await;
        Some(Matched {
            pattern,
            params,
            handler: entry.handler.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    /// Matches `message.path` and invokes the winning handler.
    ///
    /// Fails with [`RouterError::NotFound`] (wrapped as
    /// [`RelayError::RouteNotFound`]) if nothing matches. Handler errors
    /// propagate unchanged.
    ///
    /// When the winning route's `metadata.required` is set and this router
    /// has a bound identity context (see [`Self::set_identity`]), the
    /// handler is wrapped in an [`AuthorizedHandler`] built from that
    /// context and `metadata.scope` before being invoked.
    pub async fn route(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
        let matched = self
            .find_match(&message.path)
            .await
            .ok_or_else(|| RelayError::RouteNotFound(message.path.clone()))?;

        if let Some(required) = matched.metadata.required {
            if let Some(ctx) = self.identity.read().await.clone() {
                let wrapped = AuthorizedHandler::new(matched.handler, required, matched.metadata.scope, ctx);
                return wrapped.call(message, options).await;
            }
        }
        matched.handler.call(message, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::body_of;
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, message: Message, _options: RouteOptions) -> Result<Message, RelayError> {
            Ok(Message::new(self.0, message.body))
        }
    }

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn longest_pattern_wins_ties_broken_by_registration_order() {
        let router = Router::new(cap(16));
        router
            .register("A://x/*", Arc::new(Echo("wildcard")), RouteMetadata::default())
            .await
            .unwrap();
        router
            .register(
                "A://x/{id}",
                Arc::new(Echo("param")),
                RouteMetadata::default(),
            )
            .await
            .unwrap();
        router
            .register(
                "A://x/{id}/p",
                Arc::new(Echo("param-then-literal")),
                RouteMetadata::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            router.find_match("A://x/7/p").await.unwrap().pattern,
            "A://x/{id}/p"
        );
        assert_eq!(router.find_match("A://x/7").await.unwrap().pattern, "A://x/{id}");
        assert_eq!(
            router.find_match("A://x/7/q/r").await.unwrap().pattern,
            "A://x/*"
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let router = Router::new(cap(16));
        router
            .register("A://x", Arc::new(Echo("first")), RouteMetadata::default())
            .await
            .unwrap();
        let err = router
            .register("A://x", Arc::new(Echo("second")), RouteMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Duplicate(_)));
    }

    #[tokio::test]
    async fn register_unregister_is_identity_on_route_table() {
        let router = Router::new(cap(16));
        router
            .register("A://x", Arc::new(Echo("first")), RouteMetadata::default())
            .await
            .unwrap();
        router.unregister("A://x").await.unwrap();
        assert!(!router.is_registered("A://x"));
        router
            .register("A://x", Arc::new(Echo("again")), RouteMetadata::default())
            .await
            .unwrap();
        assert!(router.is_registered("A://x"));
    }

    #[tokio::test]
    async fn cache_invalidated_on_register_reflects_fresh_computation() {
        let router = Router::new(cap(16));
        router
            .register("A://x/*", Arc::new(Echo("wildcard")), RouteMetadata::default())
            .await
            .unwrap();
        assert_eq!(router.find_match("A://x/7").await.unwrap().pattern, "A://x/*");

        // registering a more specific pattern must be reflected on the next match,
        // not the stale cached wildcard answer.
        router
            .register(
                "A://x/{id}",
                Arc::new(Echo("param")),
                RouteMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(router.find_match("A://x/7").await.unwrap().pattern, "A://x/{id}");
    }

    #[tokio::test]
    async fn route_not_found_surfaces_typed_error() {
        let router = Router::new(cap(16));
        let message = Message::new("A://missing", body_of(()));
        let err = router
            .route(message, RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RouteNotFound(_)));
    }
}
