use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Requests accepted by `submit`
    pub submitted: u64,
    /// Requests delivered to the sink
    pub completed: u64,
    /// Requests dropped because a stage failed or a channel closed
    pub lost: u64,
    /// Requests accepted but neither completed nor lost
    pub in_flight: u64,
}

/// Lock-free counters shared by the manager, workers and finisher
#[derive(Debug, Default)]
pub struct PipelineCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    lost: AtomicU64,
}

impl PipelineCounters {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let submitted = self.submitted.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        let lost = self.lost.load(Ordering::SeqCst);
        PipelineStats {
            submitted,
            completed,
            lost,
            in_flight: submitted.saturating_sub(completed + lost),
        }
    }
}
