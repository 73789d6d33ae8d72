// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Contract registry: named `{requiredMethods, requiredProperties, validate?}`
//! bundles the composer enforces against a facet before it is attached.

use std::sync::Arc;

use dashmap::DashMap;

use super::{ComposerError, FacetInstance};

/// A named contract a facet must satisfy before it is attached.
pub struct Contract {
    /// Method names the facet must expose (per [`FacetInstance::methods`]).
    pub required_methods: Vec<String>,
    /// Property names the facet must expose (per [`FacetInstance::properties`]).
    pub required_properties: Vec<String>,
    /// Optional custom validator run after the method/property check.
    pub validate: Option<Arc<dyn Fn(&dyn FacetInstance) -> Result<(), String> + Send + Sync>>,
}

impl Contract {
    /// Builds a contract requiring only the given methods.
    #[must_use]
    pub fn requiring_methods(methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required_methods: methods.into_iter().map(Into::into).collect(),
            required_properties: Vec::new(),
            validate: None,
        }
    }

    /// Adds required properties to the contract.
    #[must_use]
    pub fn requiring_properties(mut self, props: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_properties = props.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a custom validator, run after the method/property check.
    #[must_use]
    pub fn with_validator(
        mut self,
        validate: impl Fn(&dyn FacetInstance) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validate));
        self
    }
}

/// Process-wide-in-spirit registry of named contracts.
///
/// Owned explicitly by whichever kernel or composer constructs it; there is
/// no hidden module-level mutable state.
pub struct ContractRegistry {
    contracts: DashMap<String, Contract>,
}

impl ContractRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
        }
    }

    /// Registers (or replaces) a named contract.
    pub fn define(&self, name: impl Into<String>, contract: Contract) {
        self.contracts.insert(name.into(), contract);
    }

    /// Enforces `name`'s contract against `instance`, attributing failures to
    /// `kind` (the facet kind under construction).
    pub fn enforce(
        &self,
        name: &str,
        instance: &dyn FacetInstance,
        kind: &str,
    ) -> Result<(), ComposerError> {
        let contract = self
            .contracts
            .get(name)
            .ok_or_else(|| ComposerError::UnknownContract(name.to_string()))?;

        let methods = instance.methods();
        for required in &contract.required_methods {
            if !methods.iter().any(|m| m == required) {
                return Err(ComposerError::ContractViolation {
                    contract: name.to_string(),
                    kind: kind.to_string(),
                    detail: format!("missing required method {required:?}"),
                });
            }
        }

        let properties = instance.properties();
        for required in &contract.required_properties {
            if !properties.iter().any(|p| p == required) {
                return Err(ComposerError::ContractViolation {
                    contract: name.to_string(),
                    kind: kind.to_string(),
                    detail: format!("missing required property {required:?}"),
                });
            }
        }

        if let Some(validate) = &contract.validate {
            validate(instance).map_err(|detail| ComposerError::ContractViolation {
                contract: name.to_string(),
                kind: kind.to_string(),
                detail,
            })?;
        }

        Ok(())
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}
