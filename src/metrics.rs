//! Per-bus throughput bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the hot path and read by the health
/// collector. Each counter has a single logical writer per concern; atomics
/// keep the snapshot read lock-free.
#[derive(Debug, Default)]
pub struct ThroughputCounters {
    published: AtomicU64,
    consumed: AtomicU64,
    acked: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    emergency_acks: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThroughputSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub emergency_acks: u64,
}

impl ThroughputCounters {
    pub fn record_published(&self, n: u64) {
        self.published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_consumed(&self, n: u64) {
        self.consumed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emergency_ack(&self) {
        self.emergency_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            emergency_acks: self.emergency_acks.load(Ordering::Relaxed),
        }
    }
}
