// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Optional security profiles: named scope-to-level mappings a principal
//! can have applied to it.

use std::collections::HashMap;

use dashmap::DashMap;
use uuid::Uuid;

use super::rws::Level;

/// A named mapping from scope name to the level it grants (or `None` to
/// explicitly deny).
#[derive(Debug, Clone)]
pub struct SecurityProfile {
    /// Profile name.
    pub name: String,
    /// `scope -> level | null`.
    pub scopes: HashMap<String, Option<Level>>,
}

impl SecurityProfile {
    /// Builds an empty, named profile.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: HashMap::new(),
        }
    }

    /// Grants `level` on `scope`. Passing `None` records an explicit deny
    /// (distinct from the scope being entirely absent, though both resolve
    /// to "no access" in [`SecurityProfile::level_of`]).
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>, level: Option<Level>) -> Self {
        self.scopes.insert(scope.into(), level);
        self
    }

    /// Resolves the level this profile grants on `scope`, if any.
    #[must_use]
    pub fn level_of(&self, scope: &str) -> Option<Level> {
        self.scopes.get(scope).copied().flatten()
    }
}

/// Registry mapping principals to an applied [`SecurityProfile`].
///
/// A process-wide singleton in spirit, but owned by whichever kernel
/// instance constructs it — no hidden module-level mutable state.
pub struct ProfileRegistry {
    profiles: DashMap<String, SecurityProfile>,
    applied: DashMap<Uuid, String>,
}

impl ProfileRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
            applied: DashMap::new(),
        }
    }

    /// Registers (or replaces) a named profile definition.
    pub fn define(&self, profile: SecurityProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// Applies a previously defined profile to a principal by name.
    ///
    /// Returns `false` if no profile with that name has been defined.
    pub fn apply(&self, principal: Uuid, profile_name: &str) -> bool {
        if !self.profiles.contains_key(profile_name) {
            return false;
        }
        self.applied.insert(principal, profile_name.to_string());
        true
    }

    /// Resolves the level a principal's applied profile grants on `scope`.
    ///
    /// Returns `None` if the principal has no applied profile, the profile
    /// was since removed, or the profile denies/omits the scope.
    #[must_use]
    pub fn resolve(&self, principal: Uuid, scope: &str) -> Option<Level> {
        let profile_name = self.applied.get(&principal)?;
        let profile = self.profiles.get(profile_name.as_str())?;
        profile.level_of(scope)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_level_denies() {
        let profile = SecurityProfile::new("read-only").with_scope("orders", Some(Level::Read));
        assert_eq!(profile.level_of("orders"), Some(Level::Read));
        assert_eq!(profile.level_of("billing"), None);
    }

    #[test]
    fn explicit_null_denies_even_if_key_present() {
        let profile = SecurityProfile::new("locked").with_scope("orders", None);
        assert_eq!(profile.level_of("orders"), None);
    }

    #[test]
    fn apply_resolves_through_registry() {
        let registry = ProfileRegistry::new();
        registry.define(SecurityProfile::new("ops").with_scope("orders", Some(Level::ReadWrite)));
        let principal = Uuid::new_v4();
        assert!(registry.apply(principal, "ops"));
        assert_eq!(registry.resolve(principal, "orders"), Some(Level::ReadWrite));
        assert_eq!(registry.resolve(principal, "billing"), None);
    }

    #[test]
    fn applying_unknown_profile_fails() {
        let registry = ProfileRegistry::new();
        let principal = Uuid::new_v4();
        assert!(!registry.apply(principal, "nope"));
    }
}
