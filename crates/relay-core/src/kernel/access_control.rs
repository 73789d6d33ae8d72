// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Access control handle: the identity & access core bundled for callers
//! of `Kernel::access_control`.

use std::sync::Arc;

use uuid::Uuid;

use crate::identity::{IdentityError, Level, PrincipalRegistry, ProfileRegistry, Rws};

/// Read/write handle onto the kernel's principal registry, RWS, and
/// optional profile resolver, as returned by `Kernel::access_control`.
#[derive(Clone)]
pub struct AccessControl {
    principals: Arc<PrincipalRegistry>,
    rws: Arc<Rws>,
    profiles: Arc<ProfileRegistry>,
}

impl AccessControl {
    pub(crate) fn new(principals: Arc<PrincipalRegistry>, rws: Arc<Rws>, profiles: Arc<ProfileRegistry>) -> Self {
        Self {
            principals,
            rws,
            profiles,
        }
    }

    /// The backing principal registry.
    #[must_use]
    pub fn principals(&self) -> &Arc<PrincipalRegistry> {
        &self.principals
    }

    /// The backing reader/writer/grant set.
    #[must_use]
    pub fn rws(&self) -> &Arc<Rws> {
        &self.rws
    }

    /// The backing security profile registry.
    #[must_use]
    pub fn profiles(&self) -> &Arc<ProfileRegistry> {
        &self.profiles
    }

    /// Grants `level` to `grantee` on `owner`'s RWS, as `mutator`.
    pub fn grant(&self, owner: Uuid, grantee: Uuid, level: Level, mutator: Uuid) -> Result<(), IdentityError> {
        self.rws.grant(&self.principals, owner, grantee, level, mutator)
    }

    /// Revokes any grant `grantee` holds on `owner`'s RWS, as `mutator`.
    pub fn revoke(&self, owner: Uuid, grantee: Uuid, mutator: Uuid) -> Result<(), IdentityError> {
        self.rws.revoke(&self.principals, owner, grantee, mutator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CreateOptions, PrincipalKind};

    #[test]
    fn grant_and_revoke_round_trip() {
        let (principals, _kernel) = PrincipalRegistry::bootstrap();
        let principals = Arc::new(principals);
        let owner = principals.create(PrincipalKind::TopLevel, CreateOptions::default()).unwrap();
        let grantee = principals.create(PrincipalKind::Friend, CreateOptions::default()).unwrap();
        let access = AccessControl::new(principals.clone(), Arc::new(Rws::new()), Arc::new(ProfileRegistry::new()));

        access.grant(owner.id, grantee.id, Level::ReadWrite, owner.id).unwrap();
        assert!(access.rws().can_write(&principals, owner.id, grantee.id));

        access.revoke(owner.id, grantee.id, owner.id).unwrap();
        assert!(!access.rws().can_read(&principals, owner.id, grantee.id));
    }
}
