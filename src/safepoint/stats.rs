//! Per-thread safepoint counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one thread's safepoint activity.
///
/// Only slow paths update these counters; a poll that finds nothing pending
/// leaves every field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafepointStats {
    /// Times the state lock was taken, by the owner or by submitters.
    pub lock_acquisitions: u64,
    /// Polls that found the pending flag set.
    pub slow_polls: u64,
    /// Entries drained by the owning thread.
    pub entries_performed: u64,
    /// Interrupter invocations.
    pub interrupts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) lock_acquisitions: AtomicU64,
    pub(crate) slow_polls: AtomicU64,
    pub(crate) entries_performed: AtomicU64,
    pub(crate) interrupts: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> SafepointStats {
        SafepointStats {
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            slow_polls: self.slow_polls.load(Ordering::Relaxed),
            entries_performed: self.entries_performed.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }
}
