//! Batch log stores
//!
//! The batch log treats the storage engine as a durable key-value surface:
//! point write, point delete, full scan and an explicit flush. This module
//! defines that seam and two implementations:
//!
//! - [`MemoryBatchStore`]: ordered map behind a lock, for tests and ephemeral use
//! - [`FileBatchStore`]: append-only CRC-framed log with crash recovery and compaction

mod file;
mod memory;
mod mode;

pub use file::{FileBatchStore, StoreOptions, LOG_FILE_NAME};
pub use memory::MemoryBatchStore;
pub use mode::SyncMode;

use crate::entry::BatchEntry;
use batchlog_core::{BatchId, StoreResult};

/// Durable persistence for batch entries.
///
/// # Atomicity
///
/// Each entry is written and removed atomically: a concurrent scan either
/// sees the whole entry or does not see it at all. Submission and replay run
/// concurrently and rely on this instead of a shared lock.
pub trait BatchLogStore: Send + Sync {
    /// Durably append an entry. Upsert keyed by `entry.id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be written. The caller must
    /// surface it to the submitter.
    fn put(&self, entry: BatchEntry) -> StoreResult<()>;

    /// Look up a single entry
    fn get(&self, id: &BatchId) -> Option<BatchEntry>;

    /// Lazily iterate every currently persisted entry, in id order.
    ///
    /// The set of ids is fixed when the scan starts; entries deleted while
    /// the scan is running are skipped. A fresh call re-scans.
    fn scan_all(&self) -> BatchScan<'_>;

    /// Remove one entry. Deleting an absent id is not an error.
    fn delete(&self, id: &BatchId) -> StoreResult<()>;

    /// Force durability of every prior write before returning.
    fn flush(&self) -> StoreResult<()>;

    /// Number of currently persisted entries
    fn count(&self) -> u64;
}

impl<S: BatchLogStore + ?Sized> BatchLogStore for std::sync::Arc<S> {
    fn put(&self, entry: BatchEntry) -> StoreResult<()> {
        (**self).put(entry)
    }

    fn get(&self, id: &BatchId) -> Option<BatchEntry> {
        (**self).get(id)
    }

    fn scan_all(&self) -> BatchScan<'_> {
        (**self).scan_all()
    }

    fn delete(&self, id: &BatchId) -> StoreResult<()> {
        (**self).delete(id)
    }

    fn flush(&self) -> StoreResult<()> {
        (**self).flush()
    }

    fn count(&self) -> u64 {
        (**self).count()
    }
}

/// Lazy, single-use iterator over a store's entries.
///
/// Holds the ids visible when the scan began and fetches each entry only
/// when it is reached, so a long replay pass never pins the whole log.
pub struct BatchScan<'a> {
    ids: std::vec::IntoIter<BatchId>,
    fetch: Box<dyn Fn(&BatchId) -> Option<BatchEntry> + Send + 'a>,
}

impl<'a> BatchScan<'a> {
    /// Scan over `ids`, resolving each through `fetch`
    pub fn new(
        ids: Vec<BatchId>,
        fetch: impl Fn(&BatchId) -> Option<BatchEntry> + Send + 'a,
    ) -> Self {
        Self {
            ids: ids.into_iter(),
            fetch: Box::new(fetch),
        }
    }

    /// Ids not yet visited (upper bound on remaining entries)
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for BatchScan<'_> {
    type Item = BatchEntry;

    fn next(&mut self) -> Option<BatchEntry> {
        for id in self.ids.by_ref() {
            if let Some(entry) = (self.fetch)(&id) {
                return Some(entry);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

impl std::fmt::Debug for BatchScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScan")
            .field("remaining", &self.ids.len())
            .finish()
    }
}
