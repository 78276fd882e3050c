//! Worker - one per registered stage
//!
//! Receives envelopes on its inbound channel, applies the stage, then forwards
//! each envelope to the next stage on its route or to the completion channel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::core::errors::{Result, StagehandError};
use crate::route::channel::{StageReceiver, StageSender, COMPLETION_CHANNEL};
use crate::route::stage::PreparedStage;
use crate::route::types::{Envelope, RequestState};

/// Senders for every stage channel plus the completion channel
#[derive(Clone, Debug)]
pub struct RoutingTable {
    stages: Arc<HashMap<String, StageSender>>,
    completion: StageSender,
}

impl RoutingTable {
    pub fn new(stages: HashMap<String, StageSender>, completion: StageSender) -> Self {
        Self {
            stages: Arc::new(stages),
            completion,
        }
    }

    pub fn stage(&self, namespace: &str) -> Option<&StageSender> {
        self.stages.get(namespace)
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.stages.contains_key(namespace)
    }

    /// Send the envelope to its next hop, or to the completion channel when
    /// its route is exhausted. Returns the state the request moved into.
    pub async fn forward(&self, mut envelope: Envelope) -> Result<RequestState> {
        match envelope.pop_next_stage() {
            Some(next) => {
                let sender = self.stages.get(&next).ok_or_else(|| {
                    StagehandError::unknown_stage(next.clone())
                })?;
                sender.send(envelope).await?;
                Ok(RequestState::InStage(next))
            }
            None => {
                self.completion.send(envelope).await?;
                Ok(RequestState::Completed)
            }
        }
    }
}

/// A stage instance bound to its inbound channel
pub struct Worker {
    stage: PreparedStage,
    inbound: StageReceiver,
    routes: RoutingTable,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        stage: PreparedStage,
        inbound: StageReceiver,
        routes: RoutingTable,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stage,
            inbound,
            routes,
            stop_rx,
        }
    }

    pub fn namespace(&self) -> &str {
        self.stage.namespace()
    }

    /// A closed channel ends the worker only when it is its own inbound
    /// channel or the completion channel; a dead downstream stage costs just
    /// the envelope being forwarded.
    fn is_fatal(&self, err: &StagehandError) -> bool {
        match err {
            StagehandError::Channel { channel, .. } => {
                channel == COMPLETION_CHANNEL || channel == self.namespace()
            }
            other => other.is_fatal_to_worker(),
        }
    }

    /// Run until the stop signal, a stage failure, or a closed inbound or
    /// completion channel.
    ///
    /// A stage failure drops the envelope being processed and ends the
    /// worker; its inbound channel closes with it.
    pub async fn run(mut self) -> Result<()> {
        let namespace = self.namespace().to_string();
        let span = tracing::info_span!("worker", stage = %namespace);

        async move {
            debug!("Worker started");
            loop {
                let mut envelope = tokio::select! {
                    biased;
                    _ = self.stop_rx.changed() => {
                        debug!("Worker received stop signal");
                        return Ok(());
                    }
                    received = self.inbound.recv() => match received {
                        Some(envelope) => envelope,
                        None => {
                            return Err(StagehandError::channel(
                                namespace.clone(),
                                "inbound channel closed",
                            ));
                        }
                    },
                };

                let value = std::mem::take(&mut envelope.value);
                envelope.value = match self.stage.process(value).await {
                    Ok(value) => value,
                    Err(e) => {
                        let err = StagehandError::stage(
                            namespace.clone(),
                            envelope.id.as_str(),
                            e,
                        );
                        error!(request_id = %envelope.id, error = %err, "Stage failed, worker stopping");
                        return Err(err);
                    }
                };
                envelope.record_hop();

                let request_id = envelope.id.clone();
                match self.routes.forward(envelope).await {
                    Ok(state) => {
                        debug!(request_id = %request_id, next = %state, "Envelope routed");
                    }
                    Err(e) if self.is_fatal(&e) => {
                        error!(request_id = %request_id, error = %e, "Routing failed, worker stopping");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Next stage unavailable, request dropped");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Spawn the worker on its own task, logging how it ended
pub(crate) fn spawn_worker(worker: Worker) -> tokio::task::JoinHandle<Result<()>> {
    let namespace = worker.namespace().to_string();
    tokio::spawn(async move {
        let outcome = worker.run().await;
        match &outcome {
            Ok(()) => info!(stage = %namespace, "Worker stopped"),
            Err(e) => error!(stage = %namespace, category = e.category(), "Worker terminated: {}", e),
        }
        outcome
    })
}
