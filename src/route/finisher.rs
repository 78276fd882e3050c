//! Completion delivery
//!
//! The finisher drains the completion channel and hands every terminal
//! envelope to a `Finish` sink, once.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::route::channel::StageReceiver;
use crate::route::stats::PipelineCounters;
use crate::route::types::{Completion, RequestId};

/// External collaborator receiving finished payloads
#[async_trait]
pub trait Finish: Send + Sync {
    /// Called exactly once per accepted request with its final payload
    async fn finish(&self, id: &RequestId, value: Value);

    /// Called with the full completion record. Defaults to `finish`.
    async fn on_completion(&self, completion: Completion) {
        self.finish(&completion.id, completion.value).await;
    }
}

/// Sink that logs each result
pub struct LoggingSink;

#[async_trait]
impl Finish for LoggingSink {
    async fn finish(&self, id: &RequestId, value: Value) {
        tracing::info!(request_id = %id, %value, "Request done");
    }

    async fn on_completion(&self, completion: Completion) {
        let elapsed = completion.finished_at - completion.submitted_at;
        tracing::info!(
            request_id = %completion.id,
            value = %completion.value,
            hops = completion.hops,
            elapsed_ms = elapsed.num_milliseconds(),
            "Request done"
        );
    }
}

/// Sink forwarding completion records to a channel
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Completion>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Finish for ChannelSink {
    async fn finish(&self, id: &RequestId, value: Value) {
        let now = chrono::Utc::now();
        self.on_completion(Completion {
            id: id.clone(),
            value,
            hops: 0,
            submitted_at: now,
            finished_at: now,
        })
        .await;
    }

    async fn on_completion(&self, completion: Completion) {
        if self.tx.send(completion).is_err() {
            tracing::warn!("Completion receiver dropped, discarding result");
        }
    }
}

/// Sink backed by a closure
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&RequestId, Value) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Finish for FnSink<F>
where
    F: Fn(&RequestId, Value) + Send + Sync,
{
    async fn finish(&self, id: &RequestId, value: Value) {
        (self.f)(id, value)
    }
}

/// Sink that fans out to several sinks in order
pub struct CompositeSink {
    sinks: Vec<Arc<dyn Finish>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn Finish>) {
        self.sinks.push(sink);
    }
}

impl Default for CompositeSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Finish for CompositeSink {
    async fn finish(&self, id: &RequestId, value: Value) {
        for sink in &self.sinks {
            sink.finish(id, value.clone()).await;
        }
    }

    async fn on_completion(&self, completion: Completion) {
        for sink in &self.sinks {
            sink.on_completion(completion.clone()).await;
        }
    }
}

/// Drain the completion channel until stopped or every worker is gone
pub(crate) async fn run_finisher(
    mut completions: StageReceiver,
    sink: Arc<dyn Finish>,
    counters: Arc<PipelineCounters>,
    mut stop_rx: watch::Receiver<bool>,
) {
    tracing::debug!("Finisher started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                tracing::debug!("Finisher received stop signal");
                break;
            }
            received = completions.recv() => match received {
                Some(envelope) => envelope,
                None => {
                    tracing::debug!("Completion channel closed");
                    break;
                }
            },
        };

        let (completion, ticket) = envelope.into_completion();
        tracing::debug!(request_id = %completion.id, hops = completion.hops, "Delivering completion");
        sink.on_completion(completion).await;
        match ticket {
            Some(ticket) => ticket.settle(),
            None => counters.record_completed(),
        }
    }
}
