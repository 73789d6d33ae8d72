// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Permission wrapping for routes that declare `metadata.required`
//!.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::identity::{Level, PrincipalRegistry, ProfileRegistry, Rws};
use crate::message::{Message, RouteOptions};

/// A route handler. Boxed as a trait object so a [`crate::router::Router`]
/// can hold handlers of unrelated concrete types in one table.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Invokes the handler with the matched message and routing options.
    async fn call(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError>;
}

/// Adapts any `Fn(Message, RouteOptions) -> Future<Output = Result<Message, RelayError>>`
/// closure into a [`Handler`], matching the ergonomics of registering a
/// plain function as a route handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message, RouteOptions) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Message, RelayError>> + Send,
{
    async fn call(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
        (self.0)(message, options).await
    }
}

/// Lets an already type-erased handler be re-wrapped (e.g. by
/// [`AuthorizedHandler`]) without unwrapping the `Arc`.
#[async_trait]
impl Handler for Arc<dyn Handler> {
    async fn call(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
        (**self).call(message, options).await
    }
}

/// Identity context a router consults to enforce `metadata.required`
///.
#[derive(Clone)]
pub struct AuthContext {
    /// Uuid of the subsystem that owns the route table (the RWS owner).
    pub owner: uuid::Uuid,
    /// Registry used to resolve `isKernel` and scope-profile lookups.
    pub registry: Arc<PrincipalRegistry>,
    /// The owner's reader/writer/grant set.
    pub rws: Arc<Rws>,
    /// Optional scope/profile resolver.
    pub profiles: Option<Arc<ProfileRegistry>>,
}

/// Wraps `inner` so invocation enforces `required`/`scope` before the user
/// handler runs.
pub struct AuthorizedHandler<H> {
    inner: H,
    required: Level,
    scope: Option<String>,
    ctx: AuthContext,
}

impl<H: Handler> AuthorizedHandler<H> {
    /// Builds the wrapped handler.
    #[must_use]
    pub fn new(inner: H, required: Level, scope: Option<String>, ctx: AuthContext) -> Self {
        Self {
            inner,
            required,
            scope,
            ctx,
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for AuthorizedHandler<H> {
    async fn call(&self, message: Message, mut options: RouteOptions) -> Result<Message, RelayError> {
        // Step 1: extract callerId / callerIdSetBy.
        let caller_id = options
            .caller_id
            .clone()
            .ok_or_else(|| RelayError::PermissionDenied("callerIdSetBy is not a kernel".to_string()))?;
        let caller_id_set_by = options
            .caller_id_set_by
            .clone()
            .ok_or_else(|| RelayError::PermissionDenied("callerIdSetBy is not a kernel".to_string()))?;

        // Step 2: callerIdSetBy must be a kernel PKR.
        if !self.ctx.registry.is_kernel(&caller_id_set_by) {
            return Err(RelayError::PermissionDenied(
                "callerIdSetBy is not a kernel".to_string(),
            ));
        }

        // Step 3: caller must hold `required` or higher on the owner's RWS.
        if !self
            .ctx
            .rws
            .satisfies(&self.ctx.registry, self.ctx.owner, caller_id.uuid, self.required)
        {
            return Err(RelayError::PermissionDenied(format!(
                "{} access required",
                level_name(self.required)
            )));
        }

        // Step 4: optional scope check against the caller's resolved profile.
        if let Some(scope) = &self.scope {
            if let Some(profiles) = &self.ctx.profiles {
                let granted = profiles.resolve(caller_id.uuid, scope);
                if !granted.is_some_and(|level| level >= self.required) {
                    return Err(RelayError::PermissionDenied(format!(
                        "scope {scope:?} denies {} access",
                        level_name(self.required)
                    )));
                }
            }
        }

        // Step 5: strip callerIdSetBy before invoking the user handler.
        options.strip_caller_id_set_by();
        self.inner.call(message, options).await
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Read => "read",
        Level::ReadWrite => "write",
        Level::ReadWriteGrant => "grant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CreateOptions, Pkr, PrincipalKind};
    use crate::message::body_of;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, message: Message, _options: RouteOptions) -> Result<Message, RelayError> {
            Ok(message)
        }
    }

    fn ctx_with(owner: uuid::Uuid, registry: Arc<PrincipalRegistry>, rws: Arc<Rws>) -> AuthContext {
        AuthContext {
            owner,
            registry,
            rws,
            profiles: None,
        }
    }

    #[tokio::test]
    async fn denies_without_caller_id_set_by_kernel() {
        let (registry, _kernel) = PrincipalRegistry::bootstrap();
        let registry = Arc::new(registry);
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let caller = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let rws = Arc::new(Rws::new());
        rws.grant(&registry, owner.id, caller.id, Level::ReadWrite, owner.id)
            .unwrap();

        let handler = AuthorizedHandler::new(
            Echo,
            Level::ReadWrite,
            None,
            ctx_with(owner.id, registry.clone(), rws),
        );

        let caller_pkr = caller.pkr.read().await.clone();
        let forged_setter = Pkr {
            uuid: uuid::Uuid::new_v4(),
            public_key: crate::identity::mint().public,
            expires_at: None,
        };
        let options = RouteOptions {
            caller_id: Some(caller_pkr),
            caller_id_set_by: Some(forged_setter),
            ..RouteOptions::default()
        };
        let message = Message::new("A://secure/update", body_of(()));
        let err = handler.call(message, options).await.unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn denies_insufficient_level() {
        let (registry, kernel_pkr) = PrincipalRegistry::bootstrap();
        let registry = Arc::new(registry);
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let caller = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let rws = Arc::new(Rws::new());
        rws.grant(&registry, owner.id, caller.id, Level::Read, owner.id)
            .unwrap();

        let handler = AuthorizedHandler::new(
            Echo,
            Level::ReadWrite,
            None,
            ctx_with(owner.id, registry.clone(), rws),
        );
        let caller_pkr = caller.pkr.read().await.clone();
        let options = RouteOptions {
            caller_id: Some(caller_pkr),
            caller_id_set_by: Some(kernel_pkr),
            ..RouteOptions::default()
        };
        let message = Message::new("A://secure/update", body_of(()));
        let err = handler.call(message, options).await.unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(ref msg) if msg.contains("write")));
    }

    #[tokio::test]
    async fn strips_caller_id_set_by_before_invoking_inner() {
        struct Capturing(std::sync::Mutex<Option<RouteOptions>>);

        #[async_trait]
        impl Handler for Capturing {
            async fn call(&self, message: Message, options: RouteOptions) -> Result<Message, RelayError> {
                *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(options);
                Ok(message)
            }
        }

        let (registry, kernel_pkr) = PrincipalRegistry::bootstrap();
        let registry = Arc::new(registry);
        let owner = registry
            .create(PrincipalKind::TopLevel, CreateOptions::default())
            .unwrap();
        let caller = registry
            .create(PrincipalKind::Friend, CreateOptions::default())
            .unwrap();
        let rws = Arc::new(Rws::new());
        rws.grant(&registry, owner.id, caller.id, Level::ReadWriteGrant, owner.id)
            .unwrap();

        let capturing = Capturing(std::sync::Mutex::new(None));
        let handler = AuthorizedHandler::new(
            capturing,
            Level::Read,
            None,
            ctx_with(owner.id, registry.clone(), rws),
        );
        let caller_pkr = caller.pkr.read().await.clone();
        let options = RouteOptions {
            caller_id: Some(caller_pkr.clone()),
            caller_id_set_by: Some(kernel_pkr),
            ..RouteOptions::default()
        };
        let message = Message::new("A://secure/read", body_of(()));
        handler.call(message, options).await.unwrap();
        let captured = handler
            .inner
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .unwrap();
        assert_eq!(captured.caller_id, Some(caller_pkr));
        assert!(captured.caller_id_set_by.is_none());
    }
}
