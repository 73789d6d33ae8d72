// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The `Message` data model.
//!
//! A message is immutable after creation except for the fields under
//! [`MessageMeta`] that the kernel rewrites during dispatch as part of
//! `sendProtected`'s identity stamping. Bodies are type-erased behind
//! [`MessageBody`] so the bus can carry arbitrary payloads without
//! prescribing a wire format.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::identity::Pkr;

/// Unique identifier for a message.
///
/// Carried as a plain string in paths (e.g. the one-shot reply route),
/// generated from a UUID v4 by default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generates a fresh, unique message id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Type-erased message payload.
///
/// Implement this directly on a payload type when it should expose its own
/// correlation fields;
/// otherwise use [`Payload`] to wrap any `Any + Send + Sync + Debug` value
/// with the default (no embedded correlation fields) behavior.
pub trait MessageBody: Any + Send + Sync + fmt::Debug {
    /// Returns `self` as `&dyn Any` so callers can downcast to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// The body-embedded `inReplyTo` field, if the payload carries one.
    fn in_reply_to(&self) -> Option<&str> {
        None
    }

    /// The body-embedded `correlationId` field, if the payload carries one.
    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// Generic wrapper giving any `Any + Send + Sync + Debug` value the default
/// (no embedded correlation fields) [`MessageBody`] implementation.
#[derive(Debug)]
pub struct Payload<T: Any + Send + Sync + fmt::Debug>(pub T);

impl<T: Any + Send + Sync + fmt::Debug> MessageBody for Payload<T> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

/// Shared handle to a message body.
pub type Body = Arc<dyn MessageBody>;

/// Builds a type-erased [`Body`] from any payload value.
pub fn body_of<T: Any + Send + Sync + fmt::Debug>(value: T) -> Body {
    Arc::new(Payload(value))
}

/// Downcasts a [`Body`] to a concrete payload type.
#[must_use]
pub fn downcast_body<T: Any>(body: &Body) -> Option<&T> {
    body.as_any().downcast_ref::<T>()
}

/// The `responseRequired` meta field.
#[derive(Debug, Clone)]
pub struct ResponseRequired {
    /// Persistent channel route the reply should be addressed to.
    pub reply_to: String,
    /// Optional deadline in milliseconds after which a synthetic timeout fires.
    pub timeout: Option<u64>,
}

/// Mutable-at-creation envelope fields.
///
/// Once a [`Message`] has been handed to the bus, only the kernel rewrites
/// `caller_id`/`caller_id_set_by` on the *options* passed alongside it
/// — the fields here are set once by the
/// originator and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct MessageMeta {
    /// Name of the subsystem that originated the message, if known.
    pub subsystem: Option<String>,
    /// Correlation id carried in meta (command-request flavor).
    pub correlation_id: Option<String>,
    /// `inReplyTo` carried in meta (reply flavor).
    pub in_reply_to: Option<String>,
    /// Marks this message as a reply rather than a fresh request.
    pub is_response: bool,
    /// Present when the originator wants a response routed back to it.
    pub response_required: Option<ResponseRequired>,
    /// Free-form extension fields, keyed by name.
    pub custom: HashMap<String, Body>,
}

/// An immutable message carried through the bus.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique id, assigned at creation.
    pub id: MessageId,
    /// Destination path.
    pub path: String,
    /// Type-erased payload.
    pub body: Body,
    /// Envelope metadata.
    pub meta: MessageMeta,
}

impl Message {
    /// Creates a message with a fresh id.
    #[must_use]
    pub fn new(path: impl Into<String>, body: Body) -> Self {
        Self {
            id: MessageId::new(),
            path: path.into(),
            body,
            meta: MessageMeta::default(),
        }
    }

    /// Creates a message with an explicit id (used by tests and by callers
    /// that pre-compute the id, e.g. to build a one-shot reply path before
    /// dispatch).
    #[must_use]
    pub fn with_id(id: impl Into<MessageId>, path: impl Into<String>, body: Body) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            body,
            meta: MessageMeta::default(),
        }
    }

    /// Builds a synthetic timeout response addressed to `reply_to`, correlated
    /// to `in_reply_to`.
    #[must_use]
    pub fn synthetic_timeout(reply_to: impl Into<String>, in_reply_to: impl Into<String>) -> Self {
        let in_reply_to = in_reply_to.into();
        let mut meta = MessageMeta {
            is_response: true,
            in_reply_to: Some(in_reply_to.clone()),
            ..MessageMeta::default()
        };
        meta.custom.insert(
            "error".to_string(),
            body_of::<String>("timeout".to_string()),
        );
        meta.custom
            .insert("success".to_string(), body_of::<bool>(false));
        Self {
            id: MessageId::new(),
            path: reply_to.into(),
            body: body_of(SyntheticTimeout { in_reply_to }),
            meta,
        }
    }
    /// Correlation id of this message when treated as a reply, using the
    /// documented fallback order: the body's own `inReplyTo`, the body's
    /// own `correlationId`, the envelope's `meta.in_reply_to`, the
    /// envelope's `meta.correlation_id`, then a legacy
    /// `meta.custom["correlationId"]` string alias.
    #[must_use]
    pub fn reply_correlation_id(&self) -> Option<String> {
        self.body
            .in_reply_to()
            .map(ToString::to_string)
            .or_else(|| self.body.correlation_id().map(ToString::to_string))
            .or_else(|| self.meta.in_reply_to.clone())
            .or_else(|| self.meta.correlation_id.clone())
            .or_else(|| {
                self.meta
                    .custom
                    .get("correlationId")
                    .and_then(|body| downcast_body::<String>(body))
                    .cloned()
            })
    }
}

/// Canonical body carried by a synthetic timeout response
///.
#[derive(Debug, Clone)]
pub struct SyntheticTimeout {
    /// The correlation id (originating message id) this timeout answers.
    pub in_reply_to: String,
}

impl MessageBody for SyntheticTimeout {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn in_reply_to(&self) -> Option<&str> {
        Some(&self.in_reply_to)
    }

    fn correlation_id(&self) -> Option<&str> {
        Some(&self.in_reply_to)
    }
}

/// Per-call routing options threaded alongside a [`Message`]. `caller_id`/`caller_id_set_by` never appear in the persisted
/// [`Message`] envelope — they live only here, and only the kernel may set
/// `caller_id_set_by`.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Identity of the caller, as stamped by the kernel.
    pub caller_id: Option<Pkr>,
    /// PKR of whichever kernel stamped `caller_id`; proof the stamping was
    /// not forged by the caller.
    pub caller_id_set_by: Option<Pkr>,
    /// True when this call is itself a response being routed back.
    pub is_response: bool,
    /// Present when the call should register a pending response.
    pub response_required: Option<ResponseRequired>,
}

impl RouteOptions {
    /// Strips any caller-supplied identity fields.
    pub fn strip_caller_identity(&mut self) {
        self.caller_id = None;
        self.caller_id_set_by = None;
    }

    /// Strips `caller_id_set_by` only, leaving `caller_id` visible to the
    /// user handler.
    pub fn strip_caller_id_set_by(&mut self) {
        self.caller_id_set_by = None;
    }
}
