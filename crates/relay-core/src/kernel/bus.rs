// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The kernel: the root subsystem, owning identity, channels, responses,
//! and error recording, and implementing the privileged `sendProtected`
//! pipeline every other subsystem's traffic flows through.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{instrument, warn};

use super::access_control::AccessControl;
use super::channels::ChannelManager;
use super::error_manager::ErrorManager;
use super::response_manager::ResponseManager;
use crate::error::RelayError;
use crate::identity::{CreateOptions, IdentityError, Pkr, PrincipalKind, PrincipalRegistry, ProfileRegistry, Rws};
use crate::message::{Message, RouteOptions};
use crate::path;
use crate::requests::Dispatcher;
use crate::router::Router;

/// Default capacity of the kernel's bounded error-recording store.
pub const DEFAULT_ERROR_CAPACITY: usize = 256;

/// Kernel-specific errors not already covered by a narrower subsystem
/// error type.
#[derive(Debug, Error)]
pub enum KernelError {
    /// `"kernel"` is reserved and cannot be registered as a subsystem name.
    #[error("subsystem name \"kernel\" is reserved")]
    ReservedName,

    /// A subsystem with this name is already registered.
    #[error("subsystem {0:?} is already registered")]
    DuplicateSubsystem(String),

    /// Principal registry error while minting or looking up an identity.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// The root subsystem. Owns the principal registry, channel ACL, response
/// manager, and error manager, and routes every message that passes
/// through [`Kernel::send_protected_checked`] to the target subsystem's
/// own [`Router`].
pub struct Kernel {
    principals: Arc<PrincipalRegistry>,
    kernel_pkr: Pkr,
    rws: Arc<Rws>,
    profiles: Arc<ProfileRegistry>,
    channels: Arc<ChannelManager>,
    errors: Arc<ErrorManager>,
    responses: Arc<ResponseManager>,
    subsystems: DashMap<String, Arc<Router>>,
}

impl Kernel {
    /// Mints the kernel's own distinguished principal and returns a fully
    /// wired kernel, with its response manager bound to dispatch synthetic
    /// timeouts through itself.
    #[must_use]
    pub async fn bootstrap() -> Arc<Self> {
        Self::bootstrap_with_error_capacity(DEFAULT_ERROR_CAPACITY).await
    }

    /// As [`Self::bootstrap`], with an explicit error-store capacity.
    #[must_use]
    pub async fn bootstrap_with_error_capacity(error_capacity: usize) -> Arc<Self> {
        let (principals, kernel_pkr) = PrincipalRegistry::bootstrap();
        let kernel = Arc::new(Self {
            principals: Arc::new(principals),
            kernel_pkr: kernel_pkr.clone(),
            rws: Arc::new(Rws::new()),
            profiles: Arc::new(ProfileRegistry::new()),
            channels: Arc::new(ChannelManager::new()),
            errors: Arc::new(ErrorManager::new(error_capacity)),
            responses: Arc::new(ResponseManager::new()),
            subsystems: DashMap::new(),
        });
        let dispatcher: Arc<dyn Dispatcher> = kernel.clone();
        kernel.responses.bind(dispatcher, kernel_pkr).await;
        kernel
    }

    /// The kernel's own PKR (`callerIdSetBy` on every stamped call).
    #[must_use]
    pub fn pkr(&self) -> &Pkr {
        &self.kernel_pkr
    }

    /// Bundles the identity & access core for external callers
    /// (`getAccessControl`).
    #[must_use]
    pub fn access_control(&self) -> AccessControl {
        AccessControl::new(self.principals.clone(), self.rws.clone(), self.profiles.clone())
    }

    /// `getErrorManager`.
    #[must_use]
    pub fn error_manager(&self) -> &Arc<ErrorManager> {
        &self.errors
    }

    /// `getResponseManager`.
    #[must_use]
    pub fn response_manager(&self) -> &Arc<ResponseManager> {
        &self.responses
    }

    /// `getChannelManager`.
    #[must_use]
    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Registers a top-level subsystem: mints a `TopLevel` principal named
    /// `name` and records `router` as the destination for paths whose
    /// leading `subsystem://` segment is `name`.
    ///
    /// `"kernel"` is reserved and rejected with [`KernelError::ReservedName`].
    #[instrument(skip(self, router))]
    pub async fn register_subsystem(&self, name: &str, router: Arc<Router>) -> Result<Pkr, KernelError> {
        if name == "kernel" {
            return Err(KernelError::ReservedName);
        }
        if self.subsystems.contains_key(name) {
            return Err(KernelError::DuplicateSubsystem(name.to_string()));
        }
        let principal = self.principals.create(
            PrincipalKind::TopLevel,
            CreateOptions {
                name: Some(name.to_string()),
                ..CreateOptions::default()
            },
        )?;
        let pkr = principal.pkr.read().await.clone();
        self.subsystems.insert(name.to_string(), router);
        Ok(pkr)
    }

    /// Returns `true` if `name` is a registered subsystem.
    #[must_use]
    pub fn has_subsystem(&self, name: &str) -> bool {
        self.subsystems.contains_key(name)
    }

    /// Lists every registered (non-kernel) subsystem name.
    #[must_use]
    pub fn subsystem_names(&self) -> Vec<String> {
        self.subsystems.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The canonical pipeline behind [`Dispatcher::send_protected`]: identity
    /// stamping, anti-spoof, response bookkeeping, channel ACL, and routing.
    #[instrument(skip(self, message, options))]
    pub async fn send_protected_checked(
        &self,
        caller: Pkr,
        message: Message,
        mut options: RouteOptions,
    ) -> Result<Message, RelayError> {
        if options.caller_id.is_some() || options.caller_id_set_by.is_some() {
            warn!(path = %message.path, "discarding caller-supplied identity fields (anti-spoof)");
        }
        options.strip_caller_identity();
        options.caller_id = Some(caller.clone());
        options.caller_id_set_by = Some(self.kernel_pkr.clone());

        let caller_is_kernel = self.principals.is_kernel(&caller);

        if options.is_response {
            if let Some(correlation_id) = message.reply_correlation_id() {
                self.responses.handle_response(&correlation_id);
            }
            if !path::is_one_shot_reply_path(&message.path) && !caller_is_kernel {
                self.channels.authorize(&message.path, caller.uuid)?;
            }
        } else {
            if let Some(response_required) = &options.response_required {
                self.responses.register_pending(
                    message.id.to_string(),
                    response_required.reply_to.clone(),
                    response_required.timeout,
                );
            }
            if !caller_is_kernel {
                self.channels.authorize(&message.path, caller.uuid)?;
            }
        }

        self.route(message, options).await
    }

    async fn route(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
        let Some(subsystem_name) = path::subsystem_of(&message.path) else {
            return Err(RelayError::RouteNotFound(message.path));
        };
        let Some(router) = self.subsystems.get(subsystem_name).map(|entry| entry.value().clone()) else {
            self.errors.record(
                "RouteNotFound",
                format!("no subsystem registered for {subsystem_name:?}"),
                Some(message.path.clone()),
            );
            return Err(RelayError::RouteNotFound(message.path));
        };
        router.route(message, options).await
    }
}

#[async_trait]
impl Dispatcher for Kernel {
    async fn send_protected(&self, caller: Pkr, message: Message, options: RouteOptions) -> Result<Message, String> {
        self.send_protected_checked(caller, message, options)
            .await
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Level;
    use crate::message::body_of;
    use crate::router::{AuthContext, AuthorizedHandler, FnHandler, Handler, RouteMetadata};
    use std::num::NonZeroUsize;

    async fn router_with_echo(path: &str) -> Arc<Router> {
        let router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        router
            .register(
                path,
                Arc::new(FnHandler(|message: Message, _options: RouteOptions| async move {
                    Ok(message)
                })),
                RouteMetadata::default(),
            )
            .await
            .unwrap();
        router
    }

    #[tokio::test]
    async fn registering_kernel_as_a_subsystem_name_is_rejected() {
        let kernel = Kernel::bootstrap().await;
        let router = Arc::new(Router::new(NonZeroUsize::new(4).unwrap()));
        let err = kernel.register_subsystem("kernel", router).await.unwrap_err();
        assert!(matches!(err, KernelError::ReservedName));
    }

    #[tokio::test]
    async fn duplicate_subsystem_registration_is_rejected() {
        let kernel = Kernel::bootstrap().await;
        kernel
            .register_subsystem("A", router_with_echo("A://x").await)
            .await
            .unwrap();
        let err = kernel
            .register_subsystem("A", router_with_echo("A://x").await)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateSubsystem(_)));
    }

    // S4 — permission denial: the permission layer lives in the route's own
    // AuthorizedHandler; the kernel's job is just to stamp caller identity
    // correctly so that layer can see it.
    #[tokio::test]
    async fn permission_denied_surfaces_through_sendProtected() {
        let kernel = Kernel::bootstrap().await;
        let owner = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let caller = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        kernel
            .access_control()
            .grant(owner.id, caller.id, Level::Read, owner.id)
            .unwrap();

        let ctx = AuthContext {
            owner: owner.id,
            registry: kernel.access_control().principals().clone(),
            rws: kernel.access_control().rws().clone(),
            profiles: None,
        };
        let router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        router
            .register(
                "A://secure/update",
                Arc::new(AuthorizedHandler::new(
                    FnHandler(|message: Message, _options: RouteOptions| async move { Ok(message) }),
                    Level::ReadWrite,
                    None,
                    ctx,
                )),
                RouteMetadata::default(),
            )
            .await
            .unwrap();
        kernel.register_subsystem("A", router).await.unwrap();

        let caller_pkr = caller.pkr.read().await.clone();
        let message = Message::new("A://secure/update", body_of(()));
        let err = kernel
            .send_protected_checked(caller_pkr, message, RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(ref msg) if msg.contains("write")));
    }

    // S5 — anti-spoof: a forged callerId in options is discarded.
    #[tokio::test]
    async fn forged_caller_id_in_options_is_discarded() {
        let kernel = Kernel::bootstrap().await;
        let caller = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let caller_pkr = caller.pkr.read().await.clone();

        struct Capturing(std::sync::Mutex<Option<RouteOptions>>);
        #[async_trait]
        impl Handler for Capturing {
            async fn call(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
                *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(options);
                Ok(message)
            }
        }
        let capturing = Arc::new(Capturing(std::sync::Mutex::new(None)));
        let router = Arc::new(Router::new(NonZeroUsize::new(16).unwrap()));
        router
            .register("A://open", capturing.clone(), RouteMetadata::default())
            .await
            .unwrap();
        kernel.register_subsystem("A", router).await.unwrap();

        let forged = Pkr {
            uuid: uuid::Uuid::new_v4(),
            public_key: crate::identity::mint().public,
            expires_at: None,
        };
        let options = RouteOptions {
            caller_id: Some(forged),
            ..RouteOptions::default()
        };
        let message = Message::new("A://open", body_of(()));
        kernel
            .send_protected_checked(caller_pkr.clone(), message, options)
            .await
            .unwrap();

        let captured = capturing
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .unwrap();
        assert_eq!(captured.caller_id, Some(caller_pkr));
        assert_eq!(captured.caller_id_set_by, Some(kernel.pkr().clone()));
    }

    #[tokio::test]
    async fn unregistered_subsystem_is_reported_as_route_not_found() {
        let kernel = Kernel::bootstrap().await;
        let caller = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let caller_pkr = caller.pkr.read().await.clone();
        let message = Message::new("Z://missing", body_of(()));
        let err = kernel
            .send_protected_checked(caller_pkr, message, RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RouteNotFound(_)));
    }

    // Invariant #4 wired through the kernel: channel ACL gates sendProtected.
    #[tokio::test]
    async fn channel_acl_gates_send_protected() {
        let kernel = Kernel::bootstrap().await;
        let owner = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let stranger = kernel
            .access_control()
            .principals()
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        kernel.channel_manager().register("B://ch/replies", owner.id, []);
        kernel
            .register_subsystem("B", router_with_echo("B://ch/replies").await)
            .await
            .unwrap();

        let stranger_pkr = stranger.pkr.read().await.clone();
        let message = Message::new("B://ch/replies", body_of(()));
        let err = kernel
            .send_protected_checked(stranger_pkr, message, RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnauthorizedChannelUse(_)));
    }
}
