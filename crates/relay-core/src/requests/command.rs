// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command/reply requests correlated by id over a persistent channel route,
//! rather than a throwaway one-shot route.
//!
//! Unlike [`super::one_shot`], this coordinator never starts its own timer —
//! the kernel's response manager owns the deadline and, on expiry, delivers
//! a [`crate::message::Message::synthetic_timeout`] back through
//! [`CommandCoordinator::handle_reply`] exactly like a real reply.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{instrument, warn};

use super::{Dispatcher, RequestError};
use crate::identity::Pkr;
use crate::message::{Message, ResponseRequired, RouteOptions};

/// Tracks in-flight command requests correlated by id, resolving each one
/// exactly once when its reply (or a synthetic timeout) arrives.
pub struct CommandCoordinator {
    channel: String,
    pending: DashMap<String, oneshot::Sender<Message>>,
}

impl CommandCoordinator {
    /// Builds a coordinator whose replies are addressed to the persistent
    /// channel route `channel` (e.g. `"B://ch/replies"`).
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            pending: DashMap::new(),
        }
    }

    /// Sends `message` as a command, correlated by its own id, and awaits
    /// the reply the kernel eventually routes back through
    /// [`Self::handle_reply`].
    ///
    /// There is no local deadline here: a configured `timeout` is carried in
    /// `responseRequired` purely so the kernel's response manager knows when
    /// to synthesize a timeout reply.
    #[instrument(skip(self, dispatcher, message))]
    pub async fn request(
        &self,
        dispatcher: &dyn Dispatcher,
        caller: Pkr,
        mut message: Message,
        timeout_ms: Option<u64>,
    ) -> Result<Message, RequestError> {
        let correlation_id = message.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        message.meta.correlation_id = Some(correlation_id.clone());
        let response_required = ResponseRequired {
            reply_to: self.channel.clone(),
            timeout: timeout_ms,
        };
        message.meta.response_required = Some(response_required.clone());
        let options = RouteOptions {
            response_required: Some(response_required),
            ..RouteOptions::default()
        };

        let dispatch = dispatcher
            .send_protected(caller, message, options)
            .await;
        if let Err(err) = dispatch {
            self.pending.remove(&correlation_id);
            return Err(RequestError::SendFailed(err));
        }

        rx.await.map_err(|_| RequestError::Disposed)
    }

    /// Routes an inbound reply (real or synthetic timeout) to its pending
    /// command, resolving it. Returns `true` if a pending request matched.
    ///
    /// Correlation id is read in order: the body's own `inReplyTo`, the
    /// body's own `correlationId`, the envelope's `meta.in_reply_to`, the
    /// envelope's `meta.correlation_id`, and finally a legacy
    /// `meta.custom["correlationId"]` string alias kept for callers that
    /// predate the typed meta fields.
    pub fn handle_reply(&self, reply: &Message) -> bool {
        let Some(correlation_id) = reply.reply_correlation_id() else {
            warn!("reply carries no correlation id on any recognized field");
            return false;
        };

        match self.pending.remove(&correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(reply.clone());
                true
            }
            None => false,
        }
    }

    /// Number of requests currently awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending request, causing each in-flight `request()` call
    /// to resolve to [`RequestError::Disposed`] as its `oneshot::Sender` is
    /// dropped.
    pub fn dispose(&self) {
        self.pending.clear();
    }
}
