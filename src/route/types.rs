//! Message types that travel between workers
//!
//! An `Envelope` is owned by exactly one task at a time; it is moved on every
//! channel send and never cloned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::route::stats::PipelineCounters;

/// Identifier assigned to every accepted request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a request currently is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    InStage(String),
    Completed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Queued => f.write_str("queued"),
            RequestState::InStage(ns) => write!(f, "in_stage({})", ns),
            RequestState::Completed => f.write_str("completed"),
        }
    }
}

/// Payload plus the stages it still has to visit
#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub value: Value,
    remaining: VecDeque<String>,
    hops: usize,
    submitted_at: DateTime<Utc>,
    ticket: Option<Ticket>,
}

impl Envelope {
    /// Create a new envelope for `value` routed through `stages`
    pub fn new(value: Value, stages: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: RequestId::new(),
            value,
            remaining: stages.into_iter().collect(),
            hops: 0,
            submitted_at: Utc::now(),
            ticket: None,
        }
    }

    pub(crate) fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    /// Remove and return the next stage, or `None` when the route is exhausted
    pub fn pop_next_stage(&mut self) -> Option<String> {
        self.remaining.pop_front()
    }

    /// Stages not yet visited, front first
    pub fn remaining(&self) -> impl Iterator<Item = &str> {
        self.remaining.iter().map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Number of stages applied so far
    pub fn hops(&self) -> usize {
        self.hops
    }

    pub(crate) fn record_hop(&mut self) {
        self.hops += 1;
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Split a terminal envelope into the record handed to the sink and its
    /// admission ticket, which the caller settles once delivery is done.
    pub(crate) fn into_completion(self) -> (Completion, Option<Ticket>) {
        let completion = Completion {
            id: self.id,
            value: self.value,
            hops: self.hops,
            submitted_at: self.submitted_at,
            finished_at: Utc::now(),
        };
        (completion, self.ticket)
    }
}

/// Admission slot carried by an in-flight envelope.
///
/// Dropping an unsettled ticket counts the request as lost; either way the
/// semaphore permit goes back to the manager.
#[derive(Debug)]
pub(crate) struct Ticket {
    _permit: OwnedSemaphorePermit,
    counters: Arc<PipelineCounters>,
    settled: bool,
}

impl Ticket {
    pub(crate) fn new(permit: OwnedSemaphorePermit, counters: Arc<PipelineCounters>) -> Self {
        Self {
            _permit: permit,
            counters,
            settled: false,
        }
    }

    /// Mark the request as delivered and release the slot
    pub(crate) fn settle(mut self) {
        self.counters.record_completed();
        self.settled = true;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.settled {
            self.counters.record_lost();
        }
    }
}

/// A finished request as delivered to a sink
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    pub id: RequestId,
    pub value: Value,
    pub hops: usize,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
