// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity & Access Core.
//!
//! Four pieces, each owning a distinct piece of state:
//! [`PrincipalRegistry`] (uuid/name/pubkey-indexed principals),
//! [`Rws`] (per-owner reader/writer/grant sets), [`ProfileRegistry`]
//! (optional scoped profiles), and [`IdentityWrapper`] (the
//! per-principal capability handle a subsystem actually holds).

mod principal;
mod profile;
mod rws;

pub use principal::{
    mint, CreateOptions, IdentityError, KeyPair, Pkr, PkrHandle, Principal, PrincipalKind,
    PrincipalMetadata, PrincipalRegistry, PrivateKey, PublicKey,
};
pub use profile::{ProfileRegistry, SecurityProfile};
pub use rws::{Level, Rws};

use std::sync::Arc;

use uuid::Uuid;

use crate::router::{AuthContext, AuthorizedHandler, Handler};

/// Per-principal capability handle.
///
/// A subsystem holds one of these once registered; it is the thing that
/// actually knows how to authorize incoming calls
/// ([`IdentityWrapper::require_auth`]) and make privileged calls out
/// ([`IdentityWrapper::send_protected`], implemented on [`crate::kernel::Kernel`]
/// to avoid a dependency cycle between this module and the kernel).
#[derive(Clone)]
pub struct IdentityWrapper {
    principal_id: Uuid,
    pkr: PkrHandle,
    registry: Arc<PrincipalRegistry>,
    rws: Arc<Rws>,
    profiles: Option<Arc<ProfileRegistry>>,
}

impl IdentityWrapper {
    /// Builds a wrapper bound to an already-registered principal.
    #[must_use]
    pub fn new(
        principal: &Principal,
        registry: Arc<PrincipalRegistry>,
        rws: Arc<Rws>,
        profiles: Option<Arc<ProfileRegistry>>,
    ) -> Self {
        Self {
            principal_id: principal.id,
            pkr: principal.pkr.clone(),
            registry,
            rws,
            profiles,
        }
    }

    /// The principal's stable uuid.
    #[must_use]
    pub fn principal_id(&self) -> Uuid {
        self.principal_id
    }

    /// Reads the principal's current PKR.
    pub async fn pkr(&self) -> Pkr {
        self.pkr.read().await.clone()
    }

    /// The reader/writer/grant set this wrapper's owner publishes.
    #[must_use]
    pub fn rws(&self) -> &Arc<Rws> {
        &self.rws
    }

    /// The principal registry backing this wrapper.
    #[must_use]
    pub fn registry(&self) -> &Arc<PrincipalRegistry> {
        &self.registry
    }

    /// The optional scope/profile resolver backing this wrapper.
    #[must_use]
    pub fn profiles(&self) -> Option<&Arc<ProfileRegistry>> {
        self.profiles.as_ref()
    }

    /// Wraps `handler` so invocation requires `level` (and, if given,
    /// `scope`) against this wrapper's own RWS — the `requireAuth` half of
    /// the capability handle, binding this principal as the owner.
    #[must_use]
    pub fn require_auth<H: Handler>(&self, level: Level, handler: H, scope: Option<String>) -> AuthorizedHandler<H> {
        let ctx = AuthContext {
            owner: self.principal_id,
            registry: self.registry.clone(),
            rws: self.rws.clone(),
            profiles: self.profiles.clone(),
        };
        AuthorizedHandler::new(handler, level, scope, ctx)
    }
}
