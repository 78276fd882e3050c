//! Point-to-point channels between the manager, workers and the finisher
//!
//! Thin wrappers over bounded tokio mpsc that carry the channel's name so a
//! closed channel is reported as a `Channel` error naming the endpoint.

use crate::core::errors::{Result, StagehandError};
use crate::route::types::Envelope;
use tokio::sync::mpsc;

/// Name of the channel feeding the finisher
pub const COMPLETION_CHANNEL: &str = "completion";

/// Sending half; cloned for every producer of a channel
#[derive(Clone, Debug)]
pub struct StageSender {
    name: String,
    tx: mpsc::Sender<Envelope>,
}

/// Receiving half; owned by exactly one worker or by the finisher
#[derive(Debug)]
pub struct StageReceiver {
    name: String,
    rx: mpsc::Receiver<Envelope>,
}

/// Create a named FIFO channel holding at most `capacity` envelopes
pub fn stage_channel(name: impl Into<String>, capacity: usize) -> (StageSender, StageReceiver) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(capacity);
    (
        StageSender {
            name: name.clone(),
            tx,
        },
        StageReceiver { name, rx },
    )
}

impl StageSender {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand the envelope over, waiting while the channel is full.
    /// Fails once the receiving side is gone; the envelope is dropped.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx.send(envelope).await.map_err(|_| {
            StagehandError::channel(self.name.clone(), "receiver closed")
        })
    }

    /// Reserve room for one envelope without handing anything over yet.
    /// Fails once the receiving side is gone.
    pub async fn reserve(&self) -> Result<StageSlot<'_>> {
        self.tx
            .reserve()
            .await
            .map(|permit| StageSlot { permit })
            .map_err(|_| StagehandError::channel(self.name.clone(), "receiver closed"))
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reserved capacity on a stage channel; sending through it cannot fail
pub struct StageSlot<'a> {
    permit: mpsc::Permit<'a, Envelope>,
}

impl StageSlot<'_> {
    pub fn send(self, envelope: Envelope) {
        self.permit.send(envelope);
    }
}

impl StageReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next envelope; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}
