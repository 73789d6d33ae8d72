// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Principal registry.
//!
//! Key generation itself is an external collaborator; [`mint`] is the opaque primitive this crate assumes is
//! supplied — here it produces unpredictable-enough bytes via `uuid`'s RNG
//! so the rest of the crate has something concrete to hold, but no
//! cryptographic guarantee is claimed or needed for the bus's own logic.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors raised by the identity & access core.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No principal registered under the given uuid, name, or public key.
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    /// A principal with this name already exists.
    #[error("principal name already registered: {0}")]
    DuplicateName(String),

    /// The given PKR does not resolve to a live (registered, unexpired) key.
    #[error("PKR does not resolve to a live principal")]
    PkrNotResolvable,

    /// The mutator lacked `grant` on the owner's reader/writer set.
    #[error("grant required on owner {0} to mutate its access set")]
    GrantRequired(String),
}

/// Opaque public key material.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(pub Arc<[u8; 32]>);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex_prefix(&self.0[..]))
    }
}

/// Opaque private key material. Held only inside [`PrincipalRegistry`] and
/// never exposed through its public API.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Arc<[u8; 32]>);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// A freshly minted key pair: a public half safe to share and a private
/// half retained by the registry.
pub struct KeyPair {
    /// The public half, safe to share.
    pub public: PublicKey,
    /// The private half, retained only by the registry.
    pub private: PrivateKey,
}

/// Mints a new opaque key pair. Stands in for a real key-generation
/// primitive, which places outside this crate's scope.
#[must_use]
pub fn mint() -> KeyPair {
    KeyPair {
        public: PublicKey(Arc::new(random_bytes())),
        private: PrivateKey(Arc::new(random_bytes())),
    }
}

fn random_bytes() -> [u8; 32] {
    let first = *Uuid::new_v4().as_bytes();
    let second = *Uuid::new_v4().as_bytes();
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&first);
    out[16..].copy_from_slice(&second);
    out
}

/// Kind of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// A top-level subsystem registered directly on the kernel.
    TopLevel,
    /// A user-level resource principal (e.g. a storage object).
    Resource,
    /// An external collaborator granted limited standing ("friend").
    Friend,
    /// The distinguished root kernel principal.
    Kernel,
}

/// A Public Key Record — the opaque identity handle callers pass around
///.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkr {
    /// Uniquely identifies the principal this PKR currently names.
    pub uuid: Uuid,
    /// The principal's current public key.
    pub public_key: PublicKey,
    /// Optional expiry, in milliseconds since the unix epoch.
    pub expires_at: Option<u64>,
}

impl Pkr {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|exp| now_ms >= exp)
    }
}

/// Metadata attached to a principal at creation time.
pub type PrincipalMetadata = std::collections::HashMap<String, String>;

/// Shared, live-updating handle to a principal's current PKR.
///
/// Registered instances (e.g. an [`crate::identity::IdentityWrapper`])
/// hold a clone of this handle so that [`PrincipalRegistry::refresh`]
/// can update it in place.
pub type PkrHandle = Arc<RwLock<Pkr>>;

/// A registered principal, public view.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Stable identity of the principal (constant across key refreshes).
    pub id: Uuid,
    /// Kind of principal.
    pub kind: PrincipalKind,
    /// Optional human-readable name, unique within the registry.
    pub name: Option<String>,
    /// Free-form metadata supplied at creation.
    pub metadata: PrincipalMetadata,
    /// Live handle to this principal's current PKR.
    pub pkr: PkrHandle,
}

struct PrincipalRecord {
    principal: Principal,
    private_key: PrivateKey,
}

/// Registry of all principals known to the kernel.
///
/// Indexed by uuid with secondary indices by name and public key, as
/// requires. A distinguished "kernel" principal is minted at
/// construction and can never be replaced.
pub struct PrincipalRegistry {
    by_uuid: DashMap<Uuid, PrincipalRecord>,
    by_name: DashMap<String, Uuid>,
    by_public_key: DashMap<PublicKey, Uuid>,
    kernel_uuid: Uuid,
}

/// Options for [`PrincipalRegistry::create`].
#[derive(Default)]
pub struct CreateOptions {
    /// Human-readable, registry-unique name.
    pub name: Option<String>,
    /// Free-form metadata.
    pub metadata: PrincipalMetadata,
}

impl PrincipalRegistry {
    fn empty() -> Self {
        Self {
            by_uuid: DashMap::new(),
            by_name: DashMap::new(),
            by_public_key: DashMap::new(),
            kernel_uuid: Uuid::nil(),
        }
    }

    /// Builds a fresh registry and mints its distinguished kernel
    /// principal, returning the registry and the kernel's own PKR.
    #[must_use]
    pub fn bootstrap() -> (Self, Pkr) {
        let mut registry = Self::empty();
        let keys = mint();
        let uuid = Uuid::new_v4();
        let pkr = Pkr {
            uuid,
            public_key: keys.public.clone(),
            expires_at: None,
        };
        registry.kernel_uuid = uuid;
        registry.by_uuid.insert(
            uuid,
            PrincipalRecord {
                principal: Principal {
                    id: uuid,
                    kind: PrincipalKind::Kernel,
                    name: Some("kernel".to_string()),
                    metadata: PrincipalMetadata::new(),
                    pkr: Arc::new(RwLock::new(pkr.clone())),
                },
                private_key: keys.private,
            },
        );
        registry.by_name.insert("kernel".to_string(), uuid);
        registry.by_public_key.insert(keys.public, uuid);
        (registry, pkr)
    }

    /// Creates and registers a new principal of the given kind.
    pub fn create(
        &self,
        kind: PrincipalKind,
        options: CreateOptions,
    ) -> Result<Principal, IdentityError> {
        if let Some(name) = &options.name {
            if self.by_name.contains_key(name) {
                return Err(IdentityError::DuplicateName(name.clone()));
            }
        }
        let keys = mint();
        let uuid = Uuid::new_v4();
        let pkr = Pkr {
            uuid,
            public_key: keys.public.clone(),
            expires_at: None,
        };
        let principal = Principal {
            id: uuid,
            kind,
            name: options.name.clone(),
            metadata: options.metadata,
            pkr: Arc::new(RwLock::new(pkr)),
        };
        self.by_uuid.insert(
            uuid,
            PrincipalRecord {
                principal: principal.clone(),
                private_key: keys.private,
            },
        );
        if let Some(name) = options.name {
            self.by_name.insert(name, uuid);
        }
        self.by_public_key.insert(keys.public, uuid);
        Ok(principal)
    }

    /// Returns the live PKR handle for a principal by uuid, if registered.
    #[must_use]
    pub fn pkr_handle(&self, uuid: Uuid) -> Option<PkrHandle> {
        self.by_uuid.get(&uuid).map(|r| r.principal.pkr.clone())
    }

    /// Resolves a PKR to its private key, but only if it is currently
    /// registered and not expired.
    pub async fn resolve(&self, pkr: &Pkr, now_ms: u64) -> Option<PrivateKey> {
        let record = self.by_uuid.get(&pkr.uuid)?;
        let current = record.principal.pkr.read().await;
        if current.is_expired(now_ms) || current.public_key != pkr.public_key {
            return None;
        }
        Some(record.private_key.clone())
    }

    /// Looks up a principal by uuid.
    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<Principal> {
        self.by_uuid.get(&uuid).map(|r| r.principal.clone())
    }

    /// Looks up a principal by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Principal> {
        let uuid = *self.by_name.get(name)?;
        self.get(uuid)
    }

    /// Returns `true` if `uuid` is registered.
    #[must_use]
    pub fn has(&self, uuid: Uuid) -> bool {
        self.by_uuid.contains_key(&uuid)
    }

    /// Lists every registered principal.
    #[must_use]
    pub fn list(&self) -> Vec<Principal> {
        self.by_uuid.iter().map(|r| r.principal.clone()).collect()
    }

    /// Returns `true` if `pkr` currently names the distinguished kernel
    /// principal.
    #[must_use]
    pub fn is_kernel(&self, pkr: &Pkr) -> bool {
        pkr.uuid == self.kernel_uuid
    }

    /// Rotates a principal's keys in place, producing a new PKR that keeps
    /// the principal's uuid stable (see `DESIGN.md` for why this departs
    /// from a literal new-uuid-per-refresh reading).
    ///
    /// The kernel principal can never be refreshed away from its
    /// bootstrap identity.
    pub async fn refresh(&self, uuid: Uuid) -> Result<Pkr, IdentityError> {
        if uuid == self.kernel_uuid {
            return Err(IdentityError::UnknownPrincipal(
                "kernel principal cannot be refreshed".to_string(),
            ));
        }
        let record = self
            .by_uuid
            .get(&uuid)
            .ok_or_else(|| IdentityError::UnknownPrincipal(uuid.to_string()))?;
        let old_public_key = record.principal.pkr.read().await.public_key.clone();
        let handle = record.principal.pkr.clone();
        drop(record);

        let keys = mint();
        let new_pkr = Pkr {
            uuid,
            public_key: keys.public.clone(),
            expires_at: None,
        };

        {
            let mut guard = handle.write().await;
            *guard = new_pkr.clone();
        }
        if let Some(mut record) = self.by_uuid.get_mut(&uuid) {
            record.private_key = keys.private;
        }
        self.by_public_key.remove(&old_public_key);
        self.by_public_key.insert(keys.public, uuid);
        Ok(new_pkr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_mints_kernel_principal_once() {
        let (registry, kernel_pkr) = PrincipalRegistry::bootstrap();
        assert!(registry.is_kernel(&kernel_pkr));
        assert_eq!(registry.get(kernel_pkr.uuid).unwrap().kind, PrincipalKind::Kernel);
    }

    #[tokio::test]
    async fn refresh_rotates_uuid_is_stable_pkr_changes() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        let principal = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .expect("create");
        let old_pkr = principal.pkr.read().await.clone();

        let new_pkr = registry.refresh(principal.id).await.expect("refresh");
        assert_eq!(new_pkr.uuid, old_pkr.uuid, "principal identity is stable");
        assert_ne!(new_pkr.public_key, old_pkr.public_key);

        // the shared handle observes the new pkr in place
        let observed = principal.pkr.read().await.clone();
        assert_eq!(observed, new_pkr);

        assert!(registry.resolve(&old_pkr, 0).await.is_none());
        assert!(registry.resolve(&new_pkr, 0).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        registry
            .create(
                PrincipalKind::TopLevel,
                CreateOptions {
                    name: Some("A".to_string()),
                    ..CreateOptions::default()
                },
            )
            .expect("first create");
        let err = registry.create(
            PrincipalKind::TopLevel,
            CreateOptions {
                name: Some("A".to_string()),
                ..CreateOptions::default()
            },
        );
        assert!(matches!(err, Err(IdentityError::DuplicateName(_))));
    }
}
