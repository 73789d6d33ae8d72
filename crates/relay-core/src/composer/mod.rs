// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Facet/Hook Composer.
//!
//! Takes a staged list of [`Hook`] factories for a subsystem, topologically
//! orders them by declared dependency, instantiates and initializes each
//! facet in order, enforces any declared [`Contract`], and attaches the
//! result. A failed build disposes everything it added, in reverse order,
//! and leaves the subsystem with no new facets — see [`Composer::build`].

mod contract;

pub use contract::{Contract, ContractRegistry};

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Errors raised while staging, building, or disposing a subsystem's facets.
#[derive(Debug, Error)]
pub enum ComposerError {
    /// A hook's `kind` was already staged and neither declared `overwrite`.
    #[error("hook kind {0:?} is already staged")]
    DuplicateKind(String),

    /// A hook declared a dependency on a kind that was never staged.
    #[error("hook {0:?} depends on unknown kind {1:?}")]
    UnknownDependency(String, String),

    /// The staged hooks' `required` edges formed a cycle.
    #[error("dependency cycle among hook kinds: {0:?}")]
    DependencyCycle(Vec<String>),

    /// A hook's factory returned an error building its facet.
    #[error("facet kind {0:?} failed to build: {1}")]
    BuildFailed(String, String),

    /// A facet's `init` callback returned an error.
    #[error("facet kind {0:?} failed to initialize: {1}")]
    InitFailed(String, String),

    /// A facet did not satisfy its declared contract.
    #[error("contract {contract:?} violated by kind {kind:?}: {detail}")]
    ContractViolation {
        /// Name of the violated contract.
        contract: String,
        /// Kind of the facet that violated it.
        kind: String,
        /// Human-readable detail of what failed.
        detail: String,
    },

    /// A hook declared a contract name with no matching registry entry.
    #[error("unknown contract {0:?}")]
    UnknownContract(String),
}

/// A capability bundle produced by a [`Hook`]'s factory.
///
/// Once attached, a facet is effectively frozen: nothing in this crate
/// mutates it further. `methods`/`properties` exist purely so
/// [`Contract`] enforcement has something to check against a facet built
/// from dynamic registration, mirroring the spec's duck-typed contract
/// check without resorting to runtime reflection.
#[async_trait]
pub trait FacetInstance: Any + Send + Sync {
    /// Runs once, immediately after the facet is registered and before its
    /// contract (if any) is enforced. May fail; a failure aborts the build.
    async fn init(&self) -> Result<(), ComposerError> {
        Ok(())
    }

    /// Runs on subsystem disposal, in reverse build order. Best-effort:
    /// failures are not modeled because disposal must never block on them.
    async fn dispose(&self) {}

    /// Returns `self` as `&dyn Any` for downcasting to the concrete facet
    /// type after a [`Composer::find`] lookup.
    fn as_any(&self) -> &dyn Any;

    /// Method names this facet exposes, checked by [`Contract::required_methods`].
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }

    /// Property names this facet exposes, checked by [`Contract::required_properties`].
    fn properties(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Downcasts a built facet to its concrete type.
#[must_use]
pub fn downcast_facet<T: Any>(facet: &Arc<dyn FacetInstance>) -> Option<&T> {
    facet.as_any().downcast_ref::<T>()
}

type FactoryFn<Ctx> =
    dyn Fn(Ctx) -> BoxFuture<'static, Result<Arc<dyn FacetInstance>, ComposerError>> + Send + Sync;

/// A factory that produces a facet at build time, plus the dependency and
/// contract declarations the composer enforces around it.
pub struct Hook<Ctx> {
    /// The kind this hook installs a facet under.
    pub kind: String,
    /// Kinds that must already have a committed facet before this one builds.
    pub required: Vec<String>,
    /// If `true`, re-staging this kind replaces the previous hook instead of
    /// failing with [`ComposerError::DuplicateKind`].
    pub overwrite: bool,
    /// If `true`, the built facet becomes visible through [`Composer::find`].
    pub attach: bool,
    /// Optional named contract enforced before attach.
    pub contract: Option<String>,
    /// Human-readable origin, used in logs and [`FacetRecord`]-adjacent diagnostics.
    pub source: String,
    factory: Arc<FactoryFn<Ctx>>,
}

impl<Ctx: 'static> Hook<Ctx> {
    /// Builds a hook for `kind`, sourced from `source` (typically the
    /// module or crate that defines it), using `factory` to produce the
    /// facet at build time.
    pub fn new<F, Fut>(kind: impl Into<String>, source: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn FacetInstance>, ComposerError>> + Send + 'static,
    {
        Self {
            kind: kind.into(),
            required: Vec::new(),
            overwrite: false,
            attach: true,
            contract: None,
            source: source.into(),
            factory: Arc::new(move |ctx| Box::pin(factory(ctx))),
        }
    }

    /// Declares the kinds this hook depends on.
    #[must_use]
    pub fn requires(mut self, kinds: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Allows this hook to replace a previously staged hook of the same kind.
    #[must_use]
    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// Marks this facet as internal-only: built and initialized, but never
    /// returned by [`Composer::find`].
    #[must_use]
    pub fn without_attach(mut self) -> Self {
        self.attach = false;
        self
    }

    /// Declares the named contract enforced before attach.
    #[must_use]
    pub fn with_contract(mut self, name: impl Into<String>) -> Self {
        self.contract = Some(name.into());
        self
    }
}

struct StagedHook<Ctx> {
    required: Vec<String>,
    attach: bool,
    contract: Option<String>,
    source: String,
    factory: Arc<FactoryFn<Ctx>>,
}

struct FacetRecord {
    source: String,
    attach: bool,
    instance: Arc<dyn FacetInstance>,
}

struct ComposerState<Ctx> {
    staged_order: Vec<String>,
    staged: HashMap<String, StagedHook<Ctx>>,
    facets: HashMap<String, FacetRecord>,
    facet_order: Vec<String>,
}

impl<Ctx> ComposerState<Ctx> {
    fn new() -> Self {
        Self {
            staged_order: Vec::new(),
            staged: HashMap::new(),
            facets: HashMap::new(),
            facet_order: Vec::new(),
        }
    }
}

/// Topologically orders `staged_order` by each hook's `required` edges.
///
/// Stable: on a tie, hooks are emitted in their original staging order.
/// Errors if any required kind was never staged, or the dependency graph
/// has a cycle (the cycle's remaining, un-orderable kinds are reported).
fn topo_sort<Ctx>(
    staged_order: &[String],
    staged: &HashMap<String, StagedHook<Ctx>>,
) -> Result<Vec<String>, ComposerError> {
    for kind in staged_order {
        let hook = &staged[kind];
        for dep in &hook.required {
            if !staged.contains_key(dep) {
                return Err(ComposerError::UnknownDependency(kind.clone(), dep.clone()));
            }
        }
    }

    let mut remaining: Vec<String> = staged_order.to_vec();
    let mut done: HashSet<String> = HashSet::with_capacity(remaining.len());
    let mut result = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut next_remaining = Vec::with_capacity(remaining.len());
        let mut progressed = false;
        for kind in &remaining {
            let hook = &staged[kind];
            if hook.required.iter().all(|dep| done.contains(dep)) {
                result.push(kind.clone());
                done.insert(kind.clone());
                progressed = true;
            } else {
                next_remaining.push(kind.clone());
            }
        }
        if !progressed {
            return Err(ComposerError::DependencyCycle(next_remaining));
        }
        remaining = next_remaining;
    }

    Ok(result)
}

/// Builds and owns a subsystem's facets.
///
/// `Ctx` is whatever a subsystem's hooks need at build time (typically a
/// small, `Clone`-able handle back to the owning subsystem); hooks capture
/// their real dependencies directly in their factory closures rather than
/// looking them up dynamically through `Ctx`, so there is no hidden global
/// state to reason about.
pub struct Composer<Ctx> {
    contracts: Arc<ContractRegistry>,
    state: Mutex<ComposerState<Ctx>>,
}

impl<Ctx: Clone + Send + Sync + 'static> Composer<Ctx> {
    /// Builds an empty composer bound to `contracts`.
    #[must_use]
    pub fn new(contracts: Arc<ContractRegistry>) -> Self {
        Self {
            contracts,
            state: Mutex::new(ComposerState::new()),
        }
    }

    /// Stages `hook` for the next [`Composer::build`].
    ///
    /// Fails if `hook.kind` is already staged and neither the existing nor
    /// the new hook declared `overwrite`.
    pub async fn use_hook(&self, hook: Hook<Ctx>) -> Result<(), ComposerError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.staged.get(&hook.kind) {
            if !hook.overwrite {
                return Err(ComposerError::DuplicateKind(hook.kind));
            }
            let _ = existing;
        } else {
            state.staged_order.push(hook.kind.clone());
        }
        state.staged.insert(
            hook.kind.clone(),
            StagedHook {
                required: hook.required,
                attach: hook.attach,
                contract: hook.contract,
                source: hook.source,
                factory: hook.factory,
            },
        );
        Ok(())
    }

    /// Builds every staged hook in dependency order.
    ///
    /// Holds the composer's internal lock for the whole call, which is what
    /// gives the spec's "`build` blocks further `use()` on that subsystem
    /// until commit or rollback" its teeth. On any failure, every facet
    /// this call itself added is disposed (best-effort, reverse order) and
    /// removed before the error propagates; facets from a prior successful
    /// build are untouched.
    #[instrument(skip(self, ctx))]
    pub async fn build(&self, ctx: Ctx) -> Result<(), ComposerError> {
        let mut state = self.state.lock().await;
        let order = topo_sort(&state.staged_order, &state.staged)?;
        let mut added_this_build: Vec<String> = Vec::with_capacity(order.len());

        for kind in &order {
            let (factory, contract, attach, source) = {
                let staged = &state.staged[kind];
                (
                    staged.factory.clone(),
                    staged.contract.clone(),
                    staged.attach,
                    staged.source.clone(),
                )
            };

            let instance = match factory(ctx.clone()).await {
                Ok(instance) => instance,
                Err(err) => {
                    warn!(kind = %kind, error = %err, "facet factory failed; rolling back build");
                    rollback(&mut state, &added_this_build).await;
                    return Err(err);
                }
            };

            if let Err(err) = instance.init().await {
                warn!(kind = %kind, error = %err, "facet init failed; rolling back build");
                rollback(&mut state, &added_this_build).await;
                return Err(err);
            }

            if let Some(contract_name) = &contract {
                if let Err(err) = self.contracts.enforce(contract_name, instance.as_ref(), kind) {
                    warn!(kind = %kind, contract = %contract_name, "contract violated; rolling back build");
                    rollback(&mut state, &added_this_build).await;
                    return Err(err);
                }
            }

            state.facets.insert(
                kind.clone(),
                FacetRecord {
                    source,
                    attach,
                    instance,
                },
            );
            state.facet_order.push(kind.clone());
            added_this_build.push(kind.clone());
        }

        debug!(count = order.len(), "subsystem build committed");
        Ok(())
    }

    /// O(1) lookup of an attached facet by kind.
    pub async fn find(&self, kind: &str) -> Option<Arc<dyn FacetInstance>> {
        let state = self.state.lock().await;
        state
            .facets
            .get(kind)
            .filter(|record| record.attach)
            .map(|record| record.instance.clone())
    }

    /// Returns `true` if a facet is registered under `kind`, attached or not.
    pub async fn is_built(&self, kind: &str) -> bool {
        self.state.lock().await.facets.contains_key(kind)
    }

    /// Disposes every committed facet in reverse build order. Best-effort:
    /// a panicking or long-hanging dispose would be a bug in the facet, not
    /// something this crate guards against, but no dispose failure is
    /// propagated as an error.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        let order = std::mem::take(&mut state.facet_order);
        rollback(&mut state, &order).await;
        debug!(count = order.len(), "subsystem disposed");
    }
}

async fn rollback<Ctx>(state: &mut ComposerState<Ctx>, kinds: &[String]) {
    for kind in kinds.iter().rev() {
        if let Some(record) = state.facets.remove(kind) {
            record.instance.dispose().await;
        }
        state.facet_order.retain(|k| k != kind);
    }
}
