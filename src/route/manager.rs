//! Manager - builds the stage topology and accepts requests
//!
//! One channel and one worker per registered stage, one completion channel
//! drained by the finisher. Requests are admitted through a semaphore whose
//! permit travels with the envelope, so at most `max_in_flight` envelopes
//! exist at once and no channel can fill up.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::ManagerConfig;
use crate::core::errors::{Result, StagehandError};
use crate::route::channel::{stage_channel, COMPLETION_CHANNEL};
use crate::route::finisher::{run_finisher, Finish};
use crate::route::registry::StageRegistry;
use crate::route::stage::PreparedStage;
use crate::route::stats::{PipelineCounters, PipelineStats};
use crate::route::types::{Envelope, RequestId, RequestState, Ticket};
use crate::route::worker::{spawn_worker, RoutingTable, Worker};

/// A worker that ended with an error before or during shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub stage: String,
    pub error: String,
}

/// Outcome of `Manager::shutdown`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub submitted: u64,
    pub completed: u64,
    pub lost: u64,
    /// Requests still in flight when the drain timed out. They are counted
    /// in `lost` as well once their envelopes are dropped.
    pub abandoned: u64,
    /// Whether every in-flight request settled before the workers stopped
    pub drained: bool,
    pub worker_failures: Vec<WorkerFailure>,
}

/// Orchestrator owning the workers and the finisher
pub struct Manager {
    config: ManagerConfig,
    routes: RoutingTable,
    namespaces: Vec<String>,
    admission: Arc<Semaphore>,
    counters: Arc<PipelineCounters>,
    accepting: AtomicBool,
    stop_tx: watch::Sender<bool>,
    workers: HashMap<String, JoinHandle<Result<()>>>,
    finisher: Option<JoinHandle<()>>,
}

impl Manager {
    /// Build the topology and start every worker and the finisher.
    ///
    /// All stages are instantiated and prepared before any task is spawned,
    /// so a failing `prepare` leaves nothing running.
    pub async fn start(
        registry: StageRegistry,
        config: ManagerConfig,
        sink: Arc<dyn Finish>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(StagehandError::configuration("no stages registered"));
        }

        let mut prepared = Vec::with_capacity(registry.len());
        for (namespace, stage) in registry.instantiate()? {
            let mut stage = PreparedStage::new(stage);
            stage.prepare().await.map_err(|e| {
                StagehandError::configuration_field(
                    format!("stage '{}' failed to prepare: {:#}", namespace, e),
                    namespace.clone(),
                )
            })?;
            debug!(stage = %namespace, "Stage prepared");
            prepared.push((namespace, stage));
        }

        let capacity = config.max_in_flight;
        let (completion_tx, completion_rx) = stage_channel(COMPLETION_CHANNEL, capacity);

        let mut senders = HashMap::with_capacity(prepared.len());
        let mut receivers = Vec::with_capacity(prepared.len());
        for (namespace, stage) in prepared {
            let (tx, rx) = stage_channel(namespace.clone(), capacity);
            senders.insert(namespace, tx);
            receivers.push((stage, rx));
        }
        let routes = RoutingTable::new(senders, completion_tx);

        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(PipelineCounters::default());

        let mut workers = HashMap::with_capacity(receivers.len());
        for (stage, rx) in receivers {
            let namespace = stage.namespace().to_string();
            let worker = Worker::new(stage, rx, routes.clone(), stop_rx.clone());
            workers.insert(namespace, spawn_worker(worker));
        }

        let finisher = tokio::spawn(run_finisher(
            completion_rx,
            sink,
            counters.clone(),
            stop_rx,
        ));

        let namespaces = registry.namespaces();
        info!(
            manager = %config.name,
            stages = ?namespaces,
            max_in_flight = capacity,
            "Manager started"
        );

        Ok(Self {
            admission: Arc::new(Semaphore::new(capacity)),
            config,
            routes,
            namespaces,
            counters,
            accepting: AtomicBool::new(true),
            stop_tx,
            workers,
            finisher: Some(finisher),
        })
    }

    /// Submit `value` to be routed through `stages`, in order.
    ///
    /// The route is validated before anything is sent. Returns once the
    /// envelope is handed to the first stage; completion is observed only
    /// through the sink.
    pub async fn submit<I, S>(&self, value: Value, stages: I) -> Result<RequestId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        self.validate_route(&stages)?;

        if !self.accepting.load(Ordering::SeqCst) {
            return Err(StagehandError::ShuttingDown);
        }
        let permit = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StagehandError::ShuttingDown)?;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(StagehandError::ShuttingDown);
        }

        // A route through a stopped worker would lose the request midway.
        if let Some(dead) = stages
            .iter()
            .find(|ns| self.routes.stage(ns).map_or(false, |tx| tx.is_closed()))
        {
            return Err(StagehandError::channel(dead.clone(), "worker is no longer running"));
        }

        let mut envelope = Envelope::new(value, stages);
        let first = envelope
            .pop_next_stage()
            .ok_or_else(|| StagehandError::invalid_route("route must name at least one stage"))?;
        let sender = self
            .routes
            .stage(&first)
            .ok_or_else(|| StagehandError::unknown_stage(first.clone()))?;
        let slot = sender.reserve().await?;

        self.counters.record_submitted();
        let envelope = envelope.with_ticket(Ticket::new(permit, self.counters.clone()));
        let id = envelope.id.clone();
        debug!(request_id = %id, state = %RequestState::Queued, "Request accepted");

        slot.send(envelope);
        debug!(request_id = %id, state = %RequestState::InStage(first), "Request dispatched");
        Ok(id)
    }

    /// Check that a route is non-empty and names only registered stages
    pub fn validate_route(&self, stages: &[String]) -> Result<()> {
        if stages.is_empty() {
            return Err(StagehandError::invalid_route(
                "route must name at least one stage",
            ));
        }
        if let Some(unknown) = stages.iter().find(|ns| !self.routes.contains(ns)) {
            return Err(StagehandError::unknown_stage(unknown.clone()));
        }
        Ok(())
    }

    /// Registered namespaces, sorted
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Whether the worker for `namespace` is still running
    pub fn is_serving(&self, namespace: &str) -> bool {
        self.workers
            .get(namespace)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting requests, wait for in-flight ones, then stop every task.
    ///
    /// Waits at most `drain_timeout` for in-flight requests; whatever is
    /// still in flight after that is reported as abandoned.
    pub async fn shutdown(mut self) -> Result<ShutdownReport> {
        self.accepting.store(false, Ordering::SeqCst);
        info!(manager = %self.config.name, in_flight = self.stats().in_flight, "Shutting down");

        let all_permits = self.config.max_in_flight as u32;
        let drained = match tokio::time::timeout(
            self.config.drain_timeout,
            self.admission.acquire_many(all_permits),
        )
        .await
        {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "Drain timed out with requests still in flight"
                );
                false
            }
        };
        self.admission.close();
        let abandoned = if drained { 0 } else { self.stats().in_flight };

        let _ = self.stop_tx.send(true);

        let mut workers: Vec<_> = std::mem::take(&mut self.workers).into_iter().collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        let limit = self.config.drain_timeout;
        let joins = workers.into_iter().map(|(stage, mut handle)| async move {
            let error = match tokio::time::timeout(limit, &mut handle).await {
                Ok(Ok(Ok(()))) => return None,
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(join)) => StagehandError::from(join).to_string(),
                Err(_) => {
                    handle.abort();
                    "worker did not stop in time".to_string()
                }
            };
            Some(WorkerFailure { stage, error })
        });
        let worker_failures: Vec<WorkerFailure> =
            join_all(joins).await.into_iter().flatten().collect();

        if let Some(finisher) = self.finisher.take() {
            finisher.await?;
        }

        let stats = self.stats();
        let report = ShutdownReport {
            submitted: stats.submitted,
            completed: stats.completed,
            lost: stats.lost,
            abandoned,
            drained,
            worker_failures,
        };
        info!(
            manager = %self.config.name,
            completed = report.completed,
            lost = report.lost,
            abandoned = report.abandoned,
            "Manager stopped"
        );
        Ok(report)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // Tasks exit at their next receive; nothing is drained.
        let _ = self.stop_tx.send(true);
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.config.name)
            .field("namespaces", &self.namespaces)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::finisher::ChannelSink;
    use crate::route::stage::{IdentityStage, Stage};
    use async_trait::async_trait;
    use serde_json::json;

    fn echo_registry() -> StageRegistry {
        let mut registry = StageRegistry::new();
        registry
            .register("echo", || Box::new(IdentityStage::new("echo")))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_empty_registry_rejected() {
        let (sink, _rx) = ChannelSink::new();
        let err = Manager::start(StageRegistry::new(), ManagerConfig::development(), Arc::new(sink))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_failing_prepare_prevents_start() {
        struct Broken;

        #[async_trait]
        impl Stage for Broken {
            fn namespace(&self) -> &str {
                "broken"
            }

            async fn prepare(&mut self) -> anyhow::Result<()> {
                anyhow::bail!("model file missing")
            }

            async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
                Ok(value)
            }
        }

        let mut registry = echo_registry();
        registry.register("broken", || Box::new(Broken)).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let err = Manager::start(registry, ManagerConfig::development(), Arc::new(sink))
            .await
            .unwrap_err();
        match err {
            StagehandError::Configuration { message, field } => {
                assert!(message.contains("model file missing"));
                assert_eq!(field.as_deref(), Some("broken"));
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_route() {
        let (sink, _rx) = ChannelSink::new();
        let manager = Manager::start(echo_registry(), ManagerConfig::development(), Arc::new(sink))
            .await
            .unwrap();
        assert!(manager.validate_route(&["echo".to_string(), "echo".to_string()]).is_ok());
        assert!(manager.validate_route(&[]).is_err());
        assert!(manager
            .validate_route(&["echo".to_string(), "missing".to_string()])
            .is_err());
        assert!(manager.is_serving("echo"));
        assert!(!manager.is_serving("missing"));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_started_is_rejected() {
        let (sink, mut rx) = ChannelSink::new();
        let manager = Manager::start(echo_registry(), ManagerConfig::development(), Arc::new(sink))
            .await
            .unwrap();
        let id = manager.submit(json!(7), ["echo"]).await.unwrap();
        let done = rx.recv().await.unwrap();
        assert_eq!(done.id, id);
        assert_eq!(done.value, json!(7));

        manager.accepting.store(false, Ordering::SeqCst);
        let err = manager.submit(json!(8), ["echo"]).await.unwrap_err();
        assert!(matches!(err, StagehandError::ShuttingDown));

        let report = manager.shutdown().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.completed, 1);
        assert!(report.drained);
    }
}
