use std::sync::Arc;
use std::time::Duration;

use crate::core::config::ManagerConfig;
use crate::core::errors::Result;
use crate::route::finisher::{Finish, LoggingSink};
use crate::route::manager::Manager;
use crate::route::registry::StageRegistry;
use crate::route::stage::Stage;

/// Builder for a `Manager` to simplify setup
pub struct ManagerBuilder {
    registry: StageRegistry,
    config: ManagerConfig,
    sink: Option<Arc<dyn Finish>>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Create a builder with no stages, default config and a logging sink
    pub fn new() -> Self {
        Self {
            registry: StageRegistry::new(),
            config: ManagerConfig::default(),
            sink: None,
        }
    }

    /// Start from an existing registry
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a stage factory under `namespace`
    pub fn register_stage<F>(mut self, namespace: impl Into<String>, factory: F) -> Result<Self>
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.registry.register(namespace, factory)?;
        Ok(self)
    }

    /// Register a `Default` stage under its own namespace
    pub fn register_default<S: Stage + Default>(mut self) -> Result<Self> {
        self.registry.register_default::<S>()?;
        Ok(self)
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Set where finished payloads are delivered
    pub fn with_sink(mut self, sink: Arc<dyn Finish>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Prepare every stage and start the manager
    pub async fn build(self) -> Result<Manager> {
        let sink = self.sink.unwrap_or_else(|| Arc::new(LoggingSink));
        Manager::start(self.registry, self.config, sink).await
    }
}
