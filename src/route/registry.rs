//! Registry mapping namespaces to stage factories
//!
//! Built once before the manager starts; every worker gets a fresh instance
//! from the factory.

use crate::core::errors::{Result, StagehandError};
use crate::route::stage::Stage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Produces a new stage instance
pub type StageFactory = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Registry for stage factories
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
}

impl StageRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `namespace`; duplicate namespaces are rejected
    pub fn register<F>(&mut self, namespace: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(StagehandError::configuration("stage namespace cannot be empty"));
        }
        if self.factories.contains_key(&namespace) {
            return Err(StagehandError::configuration_field(
                format!("stage '{}' is already registered", namespace),
                namespace,
            ));
        }
        self.factories.insert(namespace, Arc::new(factory));
        Ok(())
    }

    /// Register a stage type constructible with `Default`, under its own namespace
    pub fn register_default<S>(&mut self) -> Result<()>
    where
        S: Stage + Default,
    {
        let namespace = S::default().namespace().to_string();
        self.register(namespace, || Box::new(S::default()))
    }

    /// Check if a namespace is registered
    pub fn contains(&self, namespace: &str) -> bool {
        self.factories.contains_key(namespace)
    }

    /// List all registered namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a fresh instance for every namespace.
    /// Fails if a factory produces a stage reporting a different namespace.
    pub(crate) fn instantiate(&self) -> Result<Vec<(String, Box<dyn Stage>)>> {
        self.factories
            .iter()
            .map(|(namespace, factory)| {
                let stage = factory();
                if stage.namespace() != namespace {
                    return Err(StagehandError::configuration_field(
                        format!(
                            "factory for '{}' produced stage '{}'",
                            namespace,
                            stage.namespace()
                        ),
                        namespace.clone(),
                    ));
                }
                Ok((namespace.clone(), stage))
            })
            .collect()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}
