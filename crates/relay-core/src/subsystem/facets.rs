// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The eight canonical facets every [`super::Subsystem`] attaches at build
//! time, wrapped as [`FacetInstance`]s so they're reachable uniformly
//! through [`super::Subsystem::find`] alongside a subsystem's own
//! domain-specific facets.
//!
//! `channels`, `responses`, and `principals` wrap kernel-owned singletons —
//! a subsystem never gets its own copy of channel ACLs, pending-response
//! bookkeeping, or the principal registry. `router`, `messages`,
//! `requests`, `commands`, and `listeners` wrap state the subsystem owns
//! itself.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::composer::FacetInstance;
use crate::identity::PrincipalRegistry;
use crate::kernel::{ChannelManager, ResponseManager};
use crate::listeners::ListenerRegistry;
use crate::requests::{CommandCoordinator, OneShotCoordinator};
use crate::router::Router;

/// Wraps a subsystem's own [`Router`].
pub struct RouterFacet(pub Arc<Router>);

#[async_trait]
impl FacetInstance for RouterFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        ["register", "unregister", "route", "findMatch"]
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }
}

/// Marker facet for the message-construction helpers (`bodyOf`,
/// `downcastBody`) in [`crate::message`] — stateless, so it carries no data
/// of its own; it exists so `find("messages")` resolves like every other
/// canonical facet instead of being special-cased.
pub struct MessagesFacet;

#[async_trait]
impl FacetInstance for MessagesFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        ["bodyOf", "downcastBody"].into_iter().map(ToString::to_string).collect()
    }
}

/// Wraps a subsystem's one-shot and command request coordinators.
pub struct RequestsFacet {
    /// The subsystem's one-shot temporary-route coordinator.
    pub one_shot: Arc<OneShotCoordinator>,
    /// The subsystem's persistent command/reply coordinator.
    pub commands: Arc<CommandCoordinator>,
}

#[async_trait]
impl FacetInstance for RequestsFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        vec!["request".to_string()]
    }
}

/// Wraps the kernel-owned channel ACL.
pub struct ChannelsFacet(pub Arc<ChannelManager>);

#[async_trait]
impl FacetInstance for ChannelsFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        ["register", "unregister", "addParticipant", "removeParticipant"]
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }
}

/// Wraps a subsystem's own command/reply coordinator.
pub struct CommandsFacet(pub Arc<CommandCoordinator>);

#[async_trait]
impl FacetInstance for CommandsFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        vec!["handleReply".to_string()]
    }
}

/// Wraps the kernel-owned pending-response manager.
pub struct ResponsesFacet(pub Arc<ResponseManager>);

#[async_trait]
impl FacetInstance for ResponsesFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        vec!["pendingCount".to_string()]
    }
}

/// Wraps a subsystem's own listener registry.
pub struct ListenersFacet(pub Arc<ListenerRegistry>);

#[async_trait]
impl FacetInstance for ListenersFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        ["on", "off", "emit"].into_iter().map(ToString::to_string).collect()
    }
}

/// Wraps the kernel-owned principal registry.
pub struct PrincipalsFacet(pub Arc<PrincipalRegistry>);

#[async_trait]
impl FacetInstance for PrincipalsFacet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn methods(&self) -> Vec<String> {
        ["get", "getByName", "list"].into_iter().map(ToString::to_string).collect()
    }
}
