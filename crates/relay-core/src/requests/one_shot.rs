// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One-shot request/response: a temporary reply route owned by the
//! originating subsystem's own router, torn down exactly once no matter how
//! the request finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{instrument, warn};

use super::{Dispatcher, RequestError};
use crate::identity::Pkr;
use crate::message::{Message, ResponseRequired, RouteOptions};
use crate::path::one_shot_reply_path;
use crate::router::{Handler, RouteMetadata, Router};

/// Post-processing applied to the reply message before `request()` returns
/// it; matches the spec's "resolves the pending future ... then executes
/// the user's post-processing."
pub type PostProcess = Arc<dyn Fn(Message) -> Result<Message, RequestError> + Send + Sync>;

struct OneShotHandler {
    reply: Mutex<Option<oneshot::Sender<Message>>>,
}

#[async_trait]
impl Handler for OneShotHandler {
    async fn call(
        &self,
        message: Message,
        _options: RouteOptions,
    ) -> Result<Message, crate::error::RelayError> {
        let mut slot = self.reply.lock().await;
        if let Some(tx) = slot.take() {
            let echo = Message::new("ack", message.body.clone());
            if tx.send(message).is_err() {
                warn!("one-shot reply arrived but the requester already gave up");
            }
            Ok(echo)
        } else {
            warn!("one-shot reply dropped: already resolved");
            Ok(message)
        }
    }
}

/// Owns the temporary reply routes a subsystem registers for its own
/// outgoing one-shot requests.
///
/// One coordinator per subsystem, built on that subsystem's own [`Router`].
pub struct OneShotCoordinator {
    subsystem: String,
    router: Arc<Router>,
}

impl OneShotCoordinator {
    /// Builds a coordinator that registers its temporary routes on
    /// `router`, addressed under `subsystem`'s own `{subsystem}://request/oneShot/{id}` path.
    #[must_use]
    pub fn new(subsystem: impl Into<String>, router: Arc<Router>) -> Self {
        Self {
            subsystem: subsystem.into(),
            router,
        }
    }

    /// Sends `message` and awaits exactly one reply (or a timeout, or a
    /// send failure), guaranteeing the temporary route is unregistered
    /// before this call returns no matter which of those three happens.
    #[instrument(skip(self, dispatcher, post_process, message))]
    pub async fn request(
        &self,
        dispatcher: &dyn Dispatcher,
        caller: Pkr,
        mut message: Message,
        timeout: Option<Duration>,
        post_process: Option<PostProcess>,
    ) -> Result<Message, RequestError> {
        let reply_path = one_shot_reply_path(&self.subsystem, &message.id.to_string());
        let (tx, rx) = oneshot::channel();
        self.router
            .register(
                &reply_path,
                Arc::new(OneShotHandler {
                    reply: Mutex::new(Some(tx)),
                }),
                RouteMetadata::default(),
            )
            .await
            .map_err(|err| RequestError::RouteRegistrationFailed(err.to_string()))?;

        let result = self.drive(dispatcher, caller, &mut message, &reply_path, timeout, rx).await;

        // Cleanup is mandatory on every exit path: response, timeout, send
        // failure, or a handler throw surfaced through `drive`.
        if let Err(err) = self.router.unregister(&reply_path).await {
            warn!(reply_path = %reply_path, error = %err, "one-shot cleanup found no route to remove");
        }

        match result {
            Ok(reply) => match post_process {
                Some(f) => f(reply),
                None => Ok(reply),
            },
            Err(err) => Err(err),
        }
    }

    async fn drive(
        &self,
        dispatcher: &dyn Dispatcher,
        caller: Pkr,
        message: &mut Message,
        reply_path: &str,
        timeout: Option<Duration>,
        rx: oneshot::Receiver<Message>,
    ) -> Result<Message, RequestError> {
        let response_required = ResponseRequired {
            reply_to: reply_path.to_string(),
            timeout: timeout.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };
        message.meta.response_required = Some(response_required.clone());
        let options = RouteOptions {
            response_required: Some(response_required),
            ..RouteOptions::default()
        };

        let dispatch = dispatcher
            .send_protected(caller, message.clone(), options)
            .await;
        if let Err(err) = dispatch {
            return Err(RequestError::SendFailed(err));
        }

        match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(RequestError::Disposed),
                Err(_elapsed) => {
                    let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                    Err(RequestError::TimedOut(ms))
                }
            },
            None => rx.await.map_err(|_| RequestError::Disposed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::body_of;
    use crate::requests::test_support::{RecordingDispatcher, SilentDispatcher};
    use crate::router::{FnHandler, RouteMetadata};
    use std::num::NonZeroUsize;

    fn any_pkr() -> Pkr {
        let keys = crate::identity::mint();
        Pkr {
            uuid: uuid::Uuid::new_v4(),
            public_key: keys.public,
            expires_at: None,
        }
    }

    // S1 — one-shot request/response.
    #[tokio::test]
    async fn resolves_with_the_reply_and_cleans_up_the_temporary_route() {
        let target_router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        target_router
            .register(
                "A://echo/{n}",
                Arc::new(FnHandler(|message: Message, options: RouteOptions| async move {
                    let reply_to = options
                        .response_required
                        .as_ref()
                        .map(|r| r.reply_to.clone())
                        .unwrap_or_default();
                    Ok(Message::new(reply_to, body_of("ok".to_string())))
                })),
                RouteMetadata::default(),
            )
            .await
            .unwrap();

        // The originating subsystem's own router hosts the temporary route.
        let caller_router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        let coordinator = OneShotCoordinator::new("B", caller_router.clone());

        // A tiny relay dispatcher: forward to the target, then forward the
        // target's reply straight back into the caller's own router so the
        // temporary route's handler fires, mimicking the kernel's bus.
        struct Relay {
            target: Arc<Router>,
            caller: Arc<Router>,
        }
        #[async_trait::async_trait]
        impl Dispatcher for Relay {
            async fn send_protected(
                &self,
                _caller: Pkr,
                message: Message,
                options: RouteOptions,
            ) -> Result<Message, String> {
                let reply = self
                    .target
                    .route(message, options)
                    .await
                    .map_err(|e| e.to_string())?;
                let _ = self
                    .caller
                    .route(reply.clone(), RouteOptions::default())
                    .await;
                Ok(reply)
            }
        }
        let dispatcher = Relay {
            target: target_router,
            caller: caller_router.clone(),
        };

        let message = Message::with_id("m1", "A://echo/42", body_of(()));
        let reply = coordinator
            .request(&dispatcher, any_pkr(), message, Some(Duration::from_millis(1000)), None)
            .await
            .unwrap();
        assert!(crate::message::downcast_body::<String>(&reply.body).is_some());
        assert!(!caller_router.is_registered("B://request/oneShot/m1"));
    }

    // S2 — one-shot timeout.
    #[tokio::test]
    async fn times_out_and_still_cleans_up() {
        let caller_router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        let coordinator = OneShotCoordinator::new("B", caller_router.clone());
        let dispatcher = SilentDispatcher;
        let message = Message::with_id("m1", "A://echo/42", body_of(()));

        let err = coordinator
            .request(&dispatcher, any_pkr(), message, Some(Duration::from_millis(20)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::TimedOut(20)));
        assert!(!caller_router.is_registered("B://request/oneShot/m1"));
    }

    #[tokio::test]
    async fn send_failure_cleans_up_route() {
        struct Failing;
        #[async_trait::async_trait]
        impl Dispatcher for Failing {
            async fn send_protected(
                &self,
                _caller: Pkr,
                _message: Message,
                _options: RouteOptions,
            ) -> Result<Message, String> {
                Err("boom".to_string())
            }
        }

        let caller_router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        let coordinator = OneShotCoordinator::new("B", caller_router.clone());
        let message = Message::with_id("m1", "A://echo/42", body_of(()));
        let err = coordinator
            .request(&Failing, any_pkr(), message, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::SendFailed(_)));
        assert!(!caller_router.is_registered("B://request/oneShot/m1"));
    }

    #[tokio::test]
    async fn post_processing_error_surfaces_to_caller() {
        let caller_router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        let coordinator = OneShotCoordinator::new("B", caller_router.clone());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = RecordingDispatcher { sent: sent.clone() };
        let message = Message::with_id("m1", "A://echo/42", body_of(()));

        // RecordingDispatcher never replies on the temp route either, so
        // drive this with a very short timeout rather than waiting on a
        // reply that will never come, just to exercise the plumbing with a
        // deterministic post-processing closure on the *timeout* path is
        // inapplicable (post_process only runs on success); instead feed a
        // synthetic reply straight through the caller router.
        let handler_router = caller_router.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = handler_router
                .route(
                    Message::new("B://request/oneShot/m1", body_of(())),
                    RouteOptions::default(),
                )
                .await;
        });

        let post_process: PostProcess = Arc::new(|_msg| Err(RequestError::PostProcessing("nope".to_string())));
        let err = coordinator
            .request(
                &dispatcher,
                any_pkr(),
                message,
                Some(Duration::from_millis(500)),
                Some(post_process),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::PostProcessing(_)));
    }
}
