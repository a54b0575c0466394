//! Per-runner invocation statistics, read by an external stats agent and
//! written only by the runner's own thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters published via [`RunnerStats::snapshot`]. Writes come
/// only from the owning runner thread; reads may come from any thread, so
/// every field uses relaxed-enough atomics for a monotonic counter without
/// requiring external synchronization.
#[derive(Debug, Default)]
pub struct RunnerStats {
    invocations_started: AtomicU64,
    invocations_succeeded: AtomicU64,
    invocations_failed: AtomicU64,
    batches_executed: AtomicU64,
    statements_queued: AtomicU64,
}

/// A point-in-time copy of the counters, safe to hand to an external stats
/// collector without holding any lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub invocations_started: u64,
    pub invocations_succeeded: u64,
    pub invocations_failed: u64,
    pub batches_executed: u64,
    pub statements_queued: u64,
}

impl RunnerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation_started(&self) {
        self.invocations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation_succeeded(&self) {
        self.invocations_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation_failed(&self) {
        self.invocations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_executed(&self) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_statements_queued(&self, count: u64) {
        self.statements_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            invocations_started: self.invocations_started.load(Ordering::Relaxed),
            invocations_succeeded: self.invocations_succeeded.load(Ordering::Relaxed),
            invocations_failed: self.invocations_failed.load(Ordering::Relaxed),
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            statements_queued: self.statements_queued.load(Ordering::Relaxed),
        }
    }
}
