// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subsystem: the unit every facet attaches to, built on top of the kernel.
//!
//! A [`Subsystem`] owns its own [`Router`] (registerRoute/unregisterRoute/
//! route), its own [`OneShotCoordinator`]/[`CommandCoordinator`], and a
//! [`crate::listeners::ListenerRegistry`]; it delegates channel/response/
//! principal state to the kernel rather than duplicating it. All eight are
//! exposed uniformly through [`Subsystem::find`] as canonical facets —
//! `router`, `messages`, `requests`, `channels`, `commands`, `responses`,
//! `listeners`, `principals` — built the same way a subsystem's own
//! domain-specific facets are: via [`Composer`]/[`Hook`].
//!
//! Lifecycle is a one-way state machine: `Created → Building → Built →
//! Disposing → Disposed`. Only [`Subsystem::build`] advances past
//! `Created`, and only once.

mod facets;

pub use facets::{
    ChannelsFacet, CommandsFacet, ListenersFacet, MessagesFacet, PrincipalsFacet, RequestsFacet,
    ResponsesFacet, RouterFacet,
};

use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::composer::{Composer, ComposerError, ContractRegistry, FacetInstance, Hook};
use crate::error::RelayError;
use crate::identity::Pkr;
use crate::kernel::{Kernel, KernelError};
use crate::listeners::ListenerRegistry;
use crate::message::{Message, RouteOptions};
use crate::requests::{CommandCoordinator, OneShotCoordinator};
use crate::router::{AuthContext, Handler, RouteMetadata, Router, RouterError};

/// Default cache capacity for a subsystem's own router.
pub const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 256;

/// Lifecycle state of a [`Subsystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    /// Constructed, no facets built yet.
    Created,
    /// [`Subsystem::build`] is in progress.
    Building,
    /// Facets are built and the subsystem is registered with the kernel.
    Built,
    /// [`Subsystem::dispose`] is in progress.
    Disposing,
    /// Facets disposed; the subsystem is no longer usable.
    Disposed,
}

/// Errors raised by [`Subsystem`] lifecycle operations.
#[derive(Debug, Error)]
pub enum SubsystemError {
    /// [`Subsystem::build`] was called more than once.
    #[error("subsystem already built")]
    AlreadyBuilt,

    /// A route operation was attempted before [`Subsystem::build`] completed.
    #[error("subsystem is not built")]
    NotBuilt,

    /// The subsystem was disposed.
    #[error("subsystem is disposed")]
    Disposed,

    /// A canonical or user-supplied facet failed to build.
    #[error(transparent)]
    Composer(#[from] ComposerError),

    /// The kernel rejected subsystem registration (reserved or duplicate name).
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// A named unit of behavior registered with the kernel.
///
/// Construction (`new`) is cheap and synchronous: it allocates the
/// subsystem's own router, request coordinators, and listener registry, and
/// stages (but does not build) the eight canonical facet hooks. Call
/// [`Subsystem::use_hook`] to stage additional facets — optionally
/// overriding a canonical one with [`Hook::overwriting`] — then
/// [`Subsystem::build`] exactly once to commit them all and register with
/// the kernel.
pub struct Subsystem {
    name: String,
    kernel: Arc<Kernel>,
    router: Arc<Router>,
    one_shot: Arc<OneShotCoordinator>,
    commands: Arc<CommandCoordinator>,
    listeners: Arc<ListenerRegistry>,
    composer: Composer<()>,
    state: AsyncMutex<SubsystemState>,
    pkr: AsyncMutex<Option<Pkr>>,
}

impl Subsystem {
    /// Builds an unbuilt subsystem named `name`, owned by `kernel`.
    ///
    /// Replies for this subsystem's own one-shot and command requests are
    /// addressed to `reply_channel` (typically `"{name}://ch/replies"`);
    /// the caller is responsible for registering that path with the
    /// kernel's [`crate::kernel::ChannelManager`] if it should be ACL-gated.
    #[must_use]
    pub fn new(name: impl Into<String>, kernel: Arc<Kernel>, reply_channel: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let router = Arc::new(Router::new(
            NonZeroUsize::new(DEFAULT_ROUTE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        ));
        let commands = Arc::new(CommandCoordinator::new(reply_channel));
        let one_shot = Arc::new(OneShotCoordinator::new(name.clone(), router.clone()));
        let listeners = Arc::new(ListenerRegistry::new(crate::listeners::RegistrationPolicy::Multiple));
        let composer = Composer::new(Arc::new(ContractRegistry::new()));

        let subsystem = Arc::new(Self {
            name,
            kernel,
            router,
            one_shot,
            commands,
            listeners,
            composer,
            state: AsyncMutex::new(SubsystemState::Created),
            pkr: AsyncMutex::new(None),
        });
        subsystem
    }

    /// The subsystem's own name, as registered with the kernel.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subsystem's own route table (`registerRoute`/`unregisterRoute`/`route`).
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The subsystem's one-shot request coordinator.
    #[must_use]
    pub fn one_shot(&self) -> &Arc<OneShotCoordinator> {
        &self.one_shot
    }

    /// The subsystem's command/reply coordinator.
    #[must_use]
    pub fn commands(&self) -> &Arc<CommandCoordinator> {
        &self.commands
    }

    /// The subsystem's own listener registry.
    #[must_use]
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SubsystemState {
        *self.state.lock().await
    }

    /// This subsystem's own PKR, set once [`Self::build`] has completed.
    pub async fn pkr(&self) -> Option<Pkr> {
        self.pkr.lock().await.clone()
    }

    /// Stages `hook` for the next [`Self::build`]. See [`Composer::use_hook`]
    /// for duplicate/overwrite semantics — pass [`Hook::overwriting`] to
    /// replace one of the eight canonical facets staged by [`Self::new`].
    pub async fn use_hook(&self, hook: Hook<()>) -> Result<(), ComposerError> {
        self.composer.use_hook(hook).await
    }

    /// Registers a route on this subsystem's own router.
    pub async fn register_route(
        &self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        metadata: RouteMetadata,
    ) -> Result<(), RouterError> {
        self.router.register(pattern, handler, metadata).await
    }

    /// Removes a previously registered route.
    pub async fn unregister_route(&self, pattern: &str) -> Result<(), RouterError> {
        self.router.unregister(pattern).await
    }

    /// Matches and invokes a handler on this subsystem's own router,
    /// bypassing the kernel's `sendProtected` pipeline — for dispatch that
    /// already arrived through the kernel and only needs local routing.
    pub async fn route(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
        self.router.route(message, options).await
    }

    /// Looks up an attached facet by kind (canonical or user-defined).
    pub async fn find(&self, kind: &str) -> Option<Arc<dyn FacetInstance>> {
        self.composer.find(kind).await
    }

    /// Stages the eight canonical facets, then builds everything staged so
    /// far and registers this subsystem with the kernel, minting its PKR.
    ///
    /// Fails without registering if any staged facet fails to build, or if
    /// the kernel rejects the name (reserved or already taken). Calling
    /// this more than once returns [`SubsystemError::AlreadyBuilt`].
    #[instrument(skip(self))]
    pub async fn build(self: &Arc<Self>) -> Result<(), SubsystemError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                SubsystemState::Created => *state = SubsystemState::Building,
                SubsystemState::Disposed | SubsystemState::Disposing => return Err(SubsystemError::Disposed),
                SubsystemState::Building | SubsystemState::Built => return Err(SubsystemError::AlreadyBuilt),
            }
        }

        if let Err(err) = self.stage_canonical_facets().await {
            *self.state.lock().await = SubsystemState::Created;
            return Err(err.into());
        }
        if let Err(err) = self.composer.build(()).await {
            *self.state.lock().await = SubsystemState::Created;
            return Err(err.into());
        }

        let pkr = match self.kernel.register_subsystem(&self.name, self.router.clone()).await {
            Ok(pkr) => pkr,
            Err(err) => {
                self.composer.dispose().await;
                *self.state.lock().await = SubsystemState::Created;
                return Err(err.into());
            }
        };
        let access = self.kernel.access_control();
        self.router
            .set_identity(AuthContext {
                owner: pkr.uuid,
                registry: access.principals().clone(),
                rws: access.rws().clone(),
                profiles: Some(access.profiles().clone()),
            })
            .await;
        *self.pkr.lock().await = Some(pkr);
        *self.state.lock().await = SubsystemState::Built;
        Ok(())
    }

    async fn stage_canonical_facets(&self) -> Result<(), ComposerError> {
        let router = self.router.clone();
        self.composer
            .use_hook(Hook::new("router", "subsystem", move |()| {
                let router = router.clone();
                async move { Ok(Arc::new(RouterFacet(router)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        self.composer
            .use_hook(Hook::new("messages", "subsystem", |()| async move {
                Ok(Arc::new(MessagesFacet) as Arc<dyn FacetInstance>)
            }))
            .await?;

        let one_shot = self.one_shot.clone();
        let commands = self.commands.clone();
        self.composer
            .use_hook(Hook::new("requests", "subsystem", move |()| {
                let one_shot = one_shot.clone();
                let commands = commands.clone();
                async move { Ok(Arc::new(RequestsFacet { one_shot, commands }) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        let channels = self.kernel.channel_manager().clone();
        self.composer
            .use_hook(Hook::new("channels", "subsystem", move |()| {
                let channels = channels.clone();
                async move { Ok(Arc::new(ChannelsFacet(channels)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        let commands = self.commands.clone();
        self.composer
            .use_hook(Hook::new("commands", "subsystem", move |()| {
                let commands = commands.clone();
                async move { Ok(Arc::new(CommandsFacet(commands)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        let responses = self.kernel.response_manager().clone();
        self.composer
            .use_hook(Hook::new("responses", "subsystem", move |()| {
                let responses = responses.clone();
                async move { Ok(Arc::new(ResponsesFacet(responses)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        let listeners = self.listeners.clone();
        self.composer
            .use_hook(Hook::new("listeners", "subsystem", move |()| {
                let listeners = listeners.clone();
                async move { Ok(Arc::new(ListenersFacet(listeners)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        let principals = self.kernel.access_control().principals().clone();
        self.composer
            .use_hook(Hook::new("principals", "subsystem", move |()| {
                let principals = principals.clone();
                async move { Ok(Arc::new(PrincipalsFacet(principals)) as Arc<dyn FacetInstance>) }
            }))
            .await?;

        Ok(())
    }

    /// Disposes every built facet (reverse build order, best-effort) and
    /// rejects any still-pending one-shot/command requests. Idempotent:
    /// disposing an already-disposed or never-built subsystem is a no-op.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                SubsystemState::Disposed | SubsystemState::Disposing => return,
                _ => *state = SubsystemState::Disposing,
            }
        }
        self.composer.dispose().await;
        self.commands.dispose();
        *self.state.lock().await = SubsystemState::Disposed;
    }
}
