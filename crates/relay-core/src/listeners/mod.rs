// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event-emitter listeners with pluggable registration policy.
//!
//! Replaces the duck-typed policy-function pattern (spec.md §9 REDESIGN
//! FLAGS) with an explicit [`RegistrationPolicy`] enum; `on`/`off`/`emit`
//! have the same shape regardless of which variant a path's registry was
//! built with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::message::Message;

/// A listener callback. Boxed as a trait object so [`ListenerRegistry`] can
/// hold listeners of unrelated concrete closures in one table.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Invoked with the emitted message. A listener that fails is logged
    /// and does not prevent other listeners on the same path from running
    /// (spec.md §7: "Listener handlers are invoked defensively").
    async fn call(&self, message: &Message);
}

#[async_trait]
impl<F, Fut> Listener for F
where
    F: Fn(&Message) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn call(&self, message: &Message) {
        (self)(message).await;
    }
}

/// Governs how a new registration on a path interacts with listeners
/// already registered there.
///
/// Variants mirror the duck-typed policies named in spec.md §9: `multiple`,
/// `single`, `replace`, `append`, `prepend`, `priority`, `limited`, plus a
/// `Custom` escape hatch for a host-supplied decision function.
pub enum RegistrationPolicy {
    /// Unlimited listeners per path, most-recently-registered last.
    Multiple,
    /// At most one listener per path; a second registration is rejected.
    Single,
    /// A new registration replaces any existing listener(s) on the path.
    Replace,
    /// Alias for [`Self::Multiple`] with new entries appended (the default
    /// ordering semantics; kept distinct so callers can name intent).
    Append,
    /// Like [`Self::Multiple`], but new entries run before existing ones.
    Prepend,
    /// Listeners run in descending priority order; ties keep registration
    /// order. `default` is the priority assigned when a caller does not
    /// supply one explicitly via [`ListenerRegistry::on_with_priority`].
    Priority {
        /// Priority assigned to registrations that don't specify one.
        default: i32,
    },
    /// At most `max` listeners per path; further registrations are rejected.
    Limited {
        /// Maximum number of simultaneously registered listeners per path.
        max: usize,
    },
    /// Host-supplied decision function, given the existing count on a path,
    /// returning `true` if a new registration should be accepted.
    Custom(Box<dyn Fn(usize) -> bool + Send + Sync>),
}

impl fmt::Debug for RegistrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multiple => write!(f, "Multiple"),
            Self::Single => write!(f, "Single"),
            Self::Replace => write!(f, "Replace"),
            Self::Append => write!(f, "Append"),
            Self::Prepend => write!(f, "Prepend"),
            Self::Priority { default } => write!(f, "Priority {{ default: {default} }}"),
            Self::Limited { max } => write!(f, "Limited {{ max: {max} }}"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Errors raised by [`ListenerRegistry::on`]/[`ListenerRegistry::on_with_priority`].
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The path already holds a listener and the registry's policy is
    /// [`RegistrationPolicy::Single`].
    #[error("path {0:?} already has a listener (single registration policy)")]
    AlreadyRegistered(String),

    /// The path already holds `max` listeners under a [`RegistrationPolicy::Limited`]
    /// policy.
    #[error("path {0:?} is at its listener limit")]
    LimitReached(String),

    /// A [`RegistrationPolicy::Custom`] decision function rejected the registration.
    #[error("path {0:?} rejected registration by custom policy")]
    RejectedByPolicy(String),
}

struct Entry {
    id: Uuid,
    priority: i32,
    listener: Arc<dyn Listener>,
}

/// Listener table for one subsystem, gated by a single [`RegistrationPolicy`].
///
/// Entries are stored per path and preserve `{handler, priority, path}` as a
/// triple even under the `priority` policy — spec.md §9's open question asks
/// that priority metadata survive a re-sort rather than being discarded, so
/// [`Self::off`] never reorders across priority buckets, it only removes.
pub struct ListenerRegistry {
    policy: RegistrationPolicy,
    by_path: RwLock<HashMap<String, Vec<Entry>>>,
}

impl ListenerRegistry {
    /// Builds an empty registry gated by `policy`.
    #[must_use]
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self {
            policy,
            by_path: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `listener` on `path` at the policy's default priority (0
    /// unless the policy is [`RegistrationPolicy::Priority`]). Returns an id
    /// usable with [`Self::off`].
    pub async fn on(&self, path: impl Into<String>, listener: Arc<dyn Listener>) -> Result<Uuid, ListenerError> {
        let default_priority = match &self.policy {
            RegistrationPolicy::Priority { default } => *default,
            _ => 0,
        };
        self.on_with_priority(path, listener, default_priority).await
    }

    /// As [`Self::on`], with an explicit priority (meaningful only under
    /// [`RegistrationPolicy::Priority`]; otherwise stored but ignored for
    /// ordering purposes).
    pub async fn on_with_priority(
        &self,
        path: impl Into<String>,
        listener: Arc<dyn Listener>,
        priority: i32,
    ) -> Result<Uuid, ListenerError> {
        let path = path.into();
        let mut by_path = self.by_path.write().await;
        let entries = by_path.entry(path.clone()).or_default();

        match &self.policy {
            RegistrationPolicy::Single if !entries.is_empty() => {
                return Err(ListenerError::AlreadyRegistered(path));
            }
            RegistrationPolicy::Limited { max } if entries.len() >= *max => {
                return Err(ListenerError::LimitReached(path));
            }
            RegistrationPolicy::Custom(decide) if !decide(entries.len()) => {
                return Err(ListenerError::RejectedByPolicy(path));
            }
            RegistrationPolicy::Replace => entries.clear(),
            _ => {}
        }

        let id = Uuid::new_v4();
        let entry = Entry { id, priority, listener };
        match &self.policy {
            RegistrationPolicy::Prepend => entries.insert(0, entry),
            RegistrationPolicy::Priority { .. } => {
                let at = entries.partition_point(|existing| existing.priority >= priority);
                entries.insert(at, entry);
            }
            _ => entries.push(entry),
        }
        Ok(id)
    }

    /// Removes a single listener by the id returned from [`Self::on`].
    /// Returns `true` if a listener was removed.
    pub async fn off(&self, path: &str, id: Uuid) -> bool {
        let mut by_path = self.by_path.write().await;
        let Some(entries) = by_path.get_mut(path) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    /// Invokes every listener registered on `path`, in stored order.
    ///
    /// Each listener is invoked defensively: a panicking future would abort
    /// the task, but an error surfaced through other means (a listener that
    /// wants to report failure logs it itself) never stops the remaining
    /// listeners from running.
    pub async fn emit(&self, path: &str, message: &Message) {
        let snapshot: Vec<Arc<dyn Listener>> = {
            let by_path = self.by_path.read().await;
            by_path
                .get(path)
                .map(|entries| entries.iter().map(|entry| entry.listener.clone()).collect())
                .unwrap_or_default()
        };
        if snapshot.is_empty() {
            warn!(path, "emit on path with no registered listeners");
            return;
        }
        for listener in snapshot {
            listener.call(message).await;
        }
    }

    /// Number of listeners currently registered on `path`.
    pub async fn count(&self, path: &str) -> usize {
        self.by_path.read().await.get(path).map_or(0, Vec::len)
    }
}
