use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::action::ActionKind;
use crate::scheduler::SchedulerState;

#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub enqueued: AtomicU64,
    pub restored: AtomicU64,
    pub superseded: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub soft_retries: AtomicU64,
    pub hard_deferrals: AtomicU64,
    pub connectivity_pauses: AtomicU64,
    pub storage_errors: AtomicU64,
    pub quarantined: AtomicU64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            soft_retries: self.soft_retries.load(Ordering::Relaxed),
            hard_deferrals: self.hard_deferrals.load(Ordering::Relaxed),
            connectivity_pauses: self.connectivity_pauses.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub restored: u64,
    pub superseded: u64,
    pub completed: u64,
    pub failed: u64,
    pub soft_retries: u64,
    pub hard_deferrals: u64,
    pub connectivity_pauses: u64,
    pub storage_errors: u64,
    pub quarantined: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDepthSnapshot {
    pub queued: usize,
    pub parked: usize,
    pub in_flight: bool,
    pub scheduler: SchedulerState,
    pub by_kind: HashMap<ActionKind, usize>,
}
