//! Stage - the unit of transformation a worker runs
//!
//! Stages are pure computation: they receive a payload, transform it and
//! return the result. Each worker owns its own instance, so implementations
//! need no internal synchronization.

use async_trait::async_trait;
use serde_json::Value;

/// A named transformation registered with the manager
#[async_trait]
pub trait Stage: Send + 'static {
    /// Get the namespace this stage is registered under
    fn namespace(&self) -> &str;

    /// One-time setup, run before the first `process` call.
    ///
    /// The manager calls this exactly once per instance. Calls made through
    /// `PreparedStage` are idempotent regardless.
    async fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Transform a payload.
    ///
    /// Must not retain the input or wait on other stages.
    async fn process(&mut self, value: Value) -> anyhow::Result<Value>;
}

/// Owned stage instance that remembers whether `prepare` has run
pub struct PreparedStage {
    inner: Box<dyn Stage>,
    prepared: bool,
}

impl PreparedStage {
    pub fn new(inner: Box<dyn Stage>) -> Self {
        Self {
            inner,
            prepared: false,
        }
    }

    pub fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Run the stage's setup hook once; later calls return immediately
    pub async fn prepare(&mut self) -> anyhow::Result<()> {
        if self.prepared {
            tracing::debug!(stage = %self.namespace(), "prepare already ran, skipping");
            return Ok(());
        }
        self.inner.prepare().await?;
        self.prepared = true;
        Ok(())
    }

    pub async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        if !self.prepared {
            anyhow::bail!("stage '{}' used before prepare", self.namespace());
        }
        self.inner.process(value).await
    }
}

impl std::fmt::Debug for PreparedStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStage")
            .field("namespace", &self.namespace())
            .field("prepared", &self.prepared)
            .finish()
    }
}

/// Stage that returns its input unchanged
pub struct IdentityStage {
    namespace: String,
}

impl IdentityStage {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Stage for IdentityStage {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        Ok(value)
    }
}
