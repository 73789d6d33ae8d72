// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stable error taxonomy for the bus.
//!
//! Each subsystem keeps its own narrow error enum close to the code that
//! raises it; this module stitches them into [`RelayError`], the type an
//! originating caller actually sees. Best-effort paths (response
//! registration, disposal, error recording) never surface as this type —
//! they're logged and swallowed at the call site instead.

use thiserror::Error;

use crate::composer::ComposerError;
use crate::identity::IdentityError;
use crate::kernel::KernelError;
use crate::requests::RequestError;
use crate::router::RouterError;

/// Top-level error type returned to a caller of the bus.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No route matched the given path.
    #[error("no route matches path {0:?}")]
    RouteNotFound(String),

    /// A pattern was registered twice on the same router.
    #[error("pattern {0:?} is already registered")]
    DuplicateRoute(String),

    /// A caller lacked the permission level required by a route.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A caller was not the owner or a participant of a channel.
    #[error("unauthorized use of channel {0:?}")]
    UnauthorizedChannelUse(String),

    /// A one-shot request's local timer elapsed before a reply arrived.
    #[error("request timed out after {0} ms")]
    TimedOut(u64),

    /// The underlying bus failed to deliver a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A temporary or persistent route could not be registered.
    #[error("route registration failed: {0}")]
    RouteRegistrationFailed(String),

    /// A facet failed to satisfy its declared contract.
    #[error("contract {contract:?} violated: {detail}")]
    ContractViolation {
        /// Name of the violated contract.
        contract: String,
        /// Human-readable detail of what was missing or failed validation.
        detail: String,
    },

    /// Hook dependencies formed a cycle.
    #[error("dependency cycle among hook kinds: {0:?}")]
    DependencyCycle(Vec<String>),

    /// A hook declared a dependency on an unstaged kind.
    #[error("unknown hook dependency: {0:?}")]
    UnknownDependency(String),

    /// The owning coordinator or registry was disposed while a future was pending.
    #[error("disposed")]
    Disposed,

    /// Composer-level error (build/dispose/contract machinery).
    #[error(transparent)]
    Composer(#[from] ComposerError),

    /// Router-level error.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Request coordinator error.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Identity & access core error.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Kernel-level error.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}
