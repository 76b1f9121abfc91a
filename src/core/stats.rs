//! Access statistics for a packed data manager

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Writes performed under the exclusive lock
    pub writes: u64,
    /// Reads that completed without taking a lock
    pub optimistic_reads: u64,
    /// Reads that fell back to the shared lock
    pub pessimistic_reads: u64,
    /// Optimistic reads abandoned because decoding failed on torn state
    pub torn_reads: u64,
    /// Reads of items that were never written
    pub unwritten_reads: u64,
}

impl ManagerStats {
    /// Share of completed reads that stayed optimistic, as a percentage
    pub fn optimistic_ratio(&self) -> f64 {
        let total = self.optimistic_reads + self.pessimistic_reads;
        if total == 0 {
            0.0
        } else {
            (self.optimistic_reads as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    writes: AtomicU64,
    optimistic_reads: AtomicU64,
    pessimistic_reads: AtomicU64,
    torn_reads: AtomicU64,
    unwritten_reads: AtomicU64,
}

impl StatCounters {
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` slot rewrites done in one exclusive section
    pub fn record_writes(&self, count: u64) {
        self.writes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_optimistic(&self) {
        self.optimistic_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pessimistic(&self) {
        self.pessimistic_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_torn(&self) {
        self.torn_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unwritten(&self) {
        self.unwritten_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            writes: self.writes.load(Ordering::Relaxed),
            optimistic_reads: self.optimistic_reads.load(Ordering::Relaxed),
            pessimistic_reads: self.pessimistic_reads.load(Ordering::Relaxed),
            torn_reads: self.torn_reads.load(Ordering::Relaxed),
            unwritten_reads: self.unwritten_reads.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.writes,
            &self.optimistic_reads,
            &self.pessimistic_reads,
            &self.torn_reads,
            &self.unwritten_reads,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
