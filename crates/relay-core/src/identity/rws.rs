// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reader/Writer/Grant sets: per-owner access structures recording which
//! level each grantee holds.

use dashmap::DashMap;
use uuid::Uuid;

use super::principal::{IdentityError, PrincipalRegistry};

/// Access level a grantee holds on an owner's [`Rws`].
///
/// Ordered so `Level::Read < Level::ReadWrite < Level::ReadWriteGrant`,
/// making the hierarchy `r ≤ rw ≤ rwg` monotone under `PartialOrd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Read-only access.
    Read,
    /// Read and write access.
    ReadWrite,
    /// Read, write, and grant access (may mutate the owner's RWS).
    ReadWriteGrant,
}

impl Level {
    /// Parses the wire-level scope strings security profiles use:
    /// `'r' | 'rw' | 'rwg'`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "r" => Some(Self::Read),
            "rw" => Some(Self::ReadWrite),
            "rwg" => Some(Self::ReadWriteGrant),
            _ => None,
        }
    }
}

/// Per-owner-PKR access structure.
///
/// A single `Rws` instance services every owner in the system: grants are
/// keyed by `(owner, grantee)` pair rather than one table per owner, which
/// keeps lookups O(1) without a second level of indirection. The owner
/// always implicitly holds `ReadWriteGrant` on itself; the kernel
/// implicitly holds `ReadWriteGrant` on every owner.
pub struct Rws {
    grants: DashMap<(Uuid, Uuid), Level>,
}

impl Rws {
    /// Builds an empty access structure.
    #[must_use]
    pub fn new() -> Self {
        Self {
            grants: DashMap::new(),
        }
    }

    /// Returns the effective level `grantee` holds on `owner`, consulting
    /// `registry` for the owner-is-self and kernel-is-implicit-grantee
    /// shortcuts.
    #[must_use]
    pub fn level_of(&self, registry: &PrincipalRegistry, owner: Uuid, grantee: Uuid) -> Option<Level> {
        if owner == grantee {
            return Some(Level::ReadWriteGrant);
        }
        if let Some(principal) = registry.get(grantee) {
            // Resolve synchronously against the pkr snapshot is unnecessary here;
            // isKernel only needs the registry's notion of "the kernel principal".
            if principal.kind == super::principal::PrincipalKind::Kernel {
                return Some(Level::ReadWriteGrant);
            }
        }
        self.grants.get(&(owner, grantee)).map(|level| *level)
    }

    /// `canRead`.
    #[must_use]
    pub fn can_read(&self, registry: &PrincipalRegistry, owner: Uuid, grantee: Uuid) -> bool {
        self.level_of(registry, owner, grantee).is_some()
    }

    /// `canWrite`. Monotonicity: implies `can_read`.
    #[must_use]
    pub fn can_write(&self, registry: &PrincipalRegistry, owner: Uuid, grantee: Uuid) -> bool {
        self.level_of(registry, owner, grantee)
            .is_some_and(|level| level >= Level::ReadWrite)
    }

    /// `canGrant`. Monotonicity: implies `can_write`.
    #[must_use]
    pub fn can_grant(&self, registry: &PrincipalRegistry, owner: Uuid, grantee: Uuid) -> bool {
        self.level_of(registry, owner, grantee)
            .is_some_and(|level| level >= Level::ReadWriteGrant)
    }

    /// Returns `true` if `grantee` holds at least `required` on `owner`.
    #[must_use]
    pub fn satisfies(
        &self,
        registry: &PrincipalRegistry,
        owner: Uuid,
        grantee: Uuid,
        required: Level,
    ) -> bool {
        self.level_of(registry, owner, grantee)
            .is_some_and(|level| level >= required)
    }

    /// Grants `level` to `grantee` on `owner`'s RWS. `mutator` must be the
    /// owner or hold `ReadWriteGrant` on the owner.
    pub fn grant(
        &self,
        registry: &PrincipalRegistry,
        owner: Uuid,
        grantee: Uuid,
        level: Level,
        mutator: Uuid,
    ) -> Result<(), IdentityError> {
        if mutator != owner && !self.can_grant(registry, owner, mutator) {
            return Err(IdentityError::GrantRequired(owner.to_string()));
        }
        self.grants.insert((owner, grantee), level);
        Ok(())
    }

    /// Revokes any grant `grantee` holds on `owner`'s RWS.
    pub fn revoke(
        &self,
        registry: &PrincipalRegistry,
        owner: Uuid,
        grantee: Uuid,
        mutator: Uuid,
    ) -> Result<(), IdentityError> {
        if mutator != owner && !self.can_grant(registry, owner, mutator) {
            return Err(IdentityError::GrantRequired(owner.to_string()));
        }
        self.grants.remove(&(owner, grantee));
        Ok(())
    }
}

impl Default for Rws {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::principal::CreateOptions;
    use crate::identity::principal::PrincipalKind;

    #[test]
    fn owner_has_implicit_rwg() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let rws = Rws::new();
        assert!(rws.can_grant(&registry, owner.id, owner.id));
    }

    #[test]
    fn kernel_has_implicit_rwg_everywhere() {
        let (registry, kernel_pkr) = PrincipalRegistry::bootstrap();
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let rws = Rws::new();
        assert!(rws.can_grant(&registry, owner.id, kernel_pkr.uuid));
    }

    #[test]
    fn monotonicity_holds() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let grantee = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        rws_assert_monotone(&registry, &Rws::new(), owner.id, grantee.id);
    }

    fn rws_assert_monotone(registry: &PrincipalRegistry, rws: &Rws, owner: Uuid, grantee: Uuid) {
        rws.grant(registry, owner, grantee, Level::ReadWriteGrant, owner)
            .unwrap();
        assert!(rws.can_write(registry, owner, grantee));
        assert!(rws.can_read(registry, owner, grantee));

        rws.grant(registry, owner, grantee, Level::ReadWrite, owner)
            .unwrap();
        assert!(rws.can_read(registry, owner, grantee));
        assert!(!rws.can_grant(registry, owner, grantee));
    }

    #[test]
    fn grant_requires_grant_level() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let stranger = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let target = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let rws = Rws::new();
        let err = rws.grant(
            &registry,
            owner.id,
            target.id,
            Level::Read,
            stranger.id,
        );
        assert!(matches!(err, Err(IdentityError::GrantRequired(_))));
    }
}
