// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Kernel-side response manager: tracks pending command replies and
//! synthesizes a timeout response when a deadline elapses.
//!
//! Registration failures here are best-effort by design (spec §7:
//! "authoritative tracking is a convenience; orphan responses are
//! tolerated") — every public method here returns nothing a caller could
//! treat as fatal.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::identity::Pkr;
use crate::message::{Message, RouteOptions};
use crate::requests::Dispatcher;

struct Pending {
    reply_to: String,
}

/// Tracks `{correlationId, deadline, replyTo}` triples and emits a
/// synthetic timeout response when a deadline elapses with no real reply.
pub struct ResponseManager {
    pending: DashMap<String, Pending>,
    dispatcher: AsyncMutex<Option<Arc<dyn Dispatcher>>>,
    kernel_pkr: AsyncMutex<Option<Pkr>>,
}

impl ResponseManager {
    /// Builds an unbound response manager. Call [`Self::bind`] once the
    /// owning kernel's `Arc` exists, before registering any pending
    /// response with a timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            dispatcher: AsyncMutex::new(None),
            kernel_pkr: AsyncMutex::new(None),
        }
    }

    /// Supplies the dispatcher (the owning kernel) and its own PKR, used to
    /// dispatch synthetic timeout responses as the kernel itself.
    pub async fn bind(&self, dispatcher: Arc<dyn Dispatcher>, kernel_pkr: Pkr) {
        *self.dispatcher.lock().await = Some(dispatcher);
        *self.kernel_pkr.lock().await = Some(kernel_pkr);
    }

    /// Registers a pending command response, arming a timeout task if
    /// `timeout_ms` is set. `self` must be held behind an `Arc` so the
    /// timeout task can keep the manager alive while it sleeps.
    pub fn register_pending(self: &Arc<Self>, correlation_id: String, reply_to: String, timeout_ms: Option<u64>) {
        self.pending.insert(
            correlation_id.clone(),
            Pending {
                reply_to: reply_to.clone(),
            },
        );

        if let Some(ms) = timeout_ms {
            let manager = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                manager.fire_timeout(&correlation_id, &reply_to).await;
            });
        }
    }

    async fn fire_timeout(&self, correlation_id: &str, reply_to: &str) {
        // Only fire if still pending: a real reply arriving first removes
        // the entry via `handle_response`, making this a no-op.
        if self.pending.remove(correlation_id).is_none() {
            return;
        }

        let dispatcher = self.dispatcher.lock().await.clone();
        let kernel_pkr = self.kernel_pkr.lock().await.clone();
        let (Some(dispatcher), Some(kernel_pkr)) = (dispatcher, kernel_pkr) else {
            warn!(correlation_id, "response manager fired timeout before being bound");
            return;
        };

        let timeout_message = Message::synthetic_timeout(reply_to, correlation_id);
        let options = RouteOptions {
            is_response: true,
            ..RouteOptions::default()
        };
        if let Err(err) = dispatcher.send_protected(kernel_pkr, timeout_message, options).await {
            warn!(correlation_id, error = %err, "failed to dispatch synthetic timeout response");
        }
    }

    /// Notifies the manager that a real response arrived, clearing any
    /// pending entry with a matching correlation id so a later timeout is a
    /// no-op. Returns `true` if a pending entry was cleared.
    pub fn handle_response(&self, correlation_id: &str) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Number of responses currently pending a reply or timeout.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ResponseManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::body_of;
    use tokio::sync::Mutex;

    struct Recording {
        sent: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait::async_trait]
    impl Dispatcher for Recording {
        async fn send_protected(
            &self,
            _caller: Pkr,
            message: Message,
            _options: RouteOptions,
        ) -> Result<Message, String> {
            self.sent.lock().await.push(message.clone());
            Ok(message)
        }
    }

    fn any_pkr() -> Pkr {
        Pkr {
            uuid: uuid::Uuid::new_v4(),
            public_key: crate::identity::mint().public,
            expires_at: None,
        }
    }

    // S3 — synthetic timeout emission.
    #[tokio::test]
    async fn fires_synthetic_timeout_when_nothing_replies_in_time() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(Recording { sent: sent.clone() });
        let manager = Arc::new(ResponseManager::new());
        manager.bind(dispatcher, any_pkr()).await;

        manager.register_pending("m2".to_string(), "B://ch/replies".to_string(), Some(20));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let sent = sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, "B://ch/replies");
        assert_eq!(
            crate::message::downcast_body::<crate::message::SyntheticTimeout>(&sent[0].body)
                .map(|t| t.in_reply_to.as_str()),
            Some("m2")
        );
    }

    #[tokio::test]
    async fn real_reply_suppresses_the_synthetic_timeout() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(Recording { sent: sent.clone() });
        let manager = Arc::new(ResponseManager::new());
        manager.bind(dispatcher, any_pkr()).await;

        manager.register_pending("m2".to_string(), "B://ch/replies".to_string(), Some(20));
        assert!(manager.handle_response("m2"));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(sent.lock().await.is_empty());
    }

    #[test]
    fn unbound_registration_without_timeout_does_not_panic() {
        let manager = Arc::new(ResponseManager::new());
        manager.register_pending("m1".to_string(), "B://ch/replies".to_string(), None);
        assert_eq!(manager.pending_count(), 1);
        let _ = body_of(());
    }
}
