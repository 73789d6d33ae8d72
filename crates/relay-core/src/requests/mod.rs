// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request Coordinator: one-shot temporary-route requests and persistent
//! command/reply requests correlated by id.
//!
//! Both flavors dispatch through whatever implements [`Dispatcher`] —
//! in practice [`crate::kernel::Kernel::send_protected`] — so this module
//! has no dependency on the kernel itself.

mod command;
mod one_shot;

pub use command::CommandCoordinator;
pub use one_shot::OneShotCoordinator;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::Pkr;
use crate::message::{Message, RouteOptions};
use crate::router::RouterError;

/// Errors raised by either request flavor.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The one-shot local timer elapsed before a reply arrived.
    #[error("request timed out after {0} ms")]
    TimedOut(u64),

    /// The underlying dispatch failed (transport error, or the target
    /// handler itself raised while the message was being routed).
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The temporary or persistent reply route could not be registered.
    #[error("route registration failed: {0}")]
    RouteRegistrationFailed(String),

    /// The coordinator was disposed while this request was still pending.
    #[error("disposed")]
    Disposed,

    /// The caller-supplied post-processing step failed after a reply arrived.
    #[error("post-processing failed: {0}")]
    PostProcessing(String),

    /// Route table error surfaced while registering/unregistering a
    /// temporary route.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// What a request coordinator dispatches through.
///
/// Implemented by [`crate::kernel::Kernel`]; kept as a trait here so this
/// module doesn't depend on the kernel crate module, only on the shape of
/// privileged send.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends `message` as `caller`, following the same pipeline as
    /// `sendProtected` (identity stamping, channel ACL, routing).
    async fn send_protected(
        &self,
        caller: Pkr,
        message: Message,
        options: RouteOptions,
    ) -> Result<Message, String>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Dispatcher, Message, Pkr, RouteOptions};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// A dispatcher that hands the dispatched message straight to a router,
    /// used by unit tests in [`super::one_shot`] and [`super::command`].
    pub struct RouterDispatcher {
        pub router: Arc<crate::router::Router>,
    }

    #[async_trait]
    impl Dispatcher for RouterDispatcher {
        async fn send_protected(
            &self,
            _caller: Pkr,
            message: Message,
            options: RouteOptions,
        ) -> Result<Message, String> {
            self.router
                .route(message, options)
                .await
                .map_err(|err| err.to_string())
        }
    }

    /// A dispatcher that accepts the message as delivered but never arranges
    /// for anything to reply, for exercising timeouts.
    pub struct SilentDispatcher;

    #[async_trait]
    impl Dispatcher for SilentDispatcher {
        async fn send_protected(
            &self,
            _caller: Pkr,
            message: Message,
            _options: RouteOptions,
        ) -> Result<Message, String> {
            Ok(message)
        }
    }

    /// Records dispatched messages for assertions; never replies on its own.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub sent: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
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
}
