//! Replay counters and reports
//!
//! Counters are process-lifetime totals. They only ever increase, and are
//! updated with relaxed atomics: they are monitoring values, not
//! synchronization. Readers that need to observe a finished pass wait on its
//! [`crate::ReplayHandle`], which orders the counter updates before the
//! wakeup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Accumulation-only counters shared by submitters and replay passes.
#[derive(Debug, Default)]
pub struct ReplayCounters {
    all_batches_seen: AtomicU64,
    batches_replayed: AtomicU64,
    replay_passes: AtomicU64,
    decode_failures: AtomicU64,
    apply_failures: AtomicU64,
    truncated_skipped: AtomicU64,
}

impl ReplayCounters {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.all_batches_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self) {
        self.batches_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass(&self) {
        self.replay_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_apply_failure(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_truncated(&self, mutations: u64) {
        self.truncated_skipped.fetch_add(mutations, Ordering::Relaxed);
    }

    /// Batches submitted since startup
    pub fn all_batches_seen(&self) -> u64 {
        self.all_batches_seen.load(Ordering::Relaxed)
    }

    /// Batches replayed and deleted since startup
    pub fn batches_replayed(&self) -> u64 {
        self.batches_replayed.load(Ordering::Relaxed)
    }

    /// Snapshot of every counter, plus the store's pending count
    pub fn snapshot(&self, pending: u64) -> BatchlogMetrics {
        BatchlogMetrics {
            pending,
            all_batches_seen: self.all_batches_seen.load(Ordering::Relaxed),
            batches_replayed: self.batches_replayed.load(Ordering::Relaxed),
            replay_passes: self.replay_passes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            truncated_skipped: self.truncated_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the batch log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchlogMetrics {
    /// Entries currently persisted
    pub pending: u64,
    /// Batches submitted since startup
    pub all_batches_seen: u64,
    /// Batches replayed and deleted since startup
    pub batches_replayed: u64,
    /// Completed replay passes
    pub replay_passes: u64,
    /// Entries left in place because their payload could not be decoded
    pub decode_failures: u64,
    /// Entry attempts that failed to apply (errors and timeouts)
    pub apply_failures: u64,
    /// Mutations dropped because their table was truncated after the write
    pub truncated_skipped: u64,
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Pass sequence number, starting at 1
    pub pass: u64,
    /// Entries visited
    pub scanned: u64,
    /// Entries still inside their direct-delivery window
    pub not_yet_eligible: u64,
    /// Entries applied and deleted
    pub replayed: u64,
    /// Entries whose payload could not be decoded
    pub decode_failures: u64,
    /// Entries that failed or timed out while applying
    pub apply_failures: u64,
    /// Entries fully applied but not deleted
    pub delete_failures: u64,
    /// Mutations dropped for truncated tables
    pub truncated_skipped: u64,
    /// Payload bytes of replayed entries
    pub bytes_replayed: u64,
    /// Pass stopped early because it was cancelled
    pub cancelled: bool,
    /// Wall time of the pass
    pub elapsed: Duration,
}

impl ReplayReport {
    /// Entries left in the log that were eligible this pass
    pub fn retained(&self) -> u64 {
        self.decode_failures + self.apply_failures + self.delete_failures
    }
}
