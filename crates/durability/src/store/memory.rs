//! In-memory batch log store

use super::{BatchLogStore, BatchScan};
use crate::entry::BatchEntry;
use batchlog_core::{BatchId, StoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ordered in-memory store.
///
/// Nothing survives the process; `flush` is a no-op. Useful for tests and for
/// deployments that accept losing pending batches on restart.
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    entries: RwLock<BTreeMap<BatchId, BatchEntry>>,
}

impl MemoryBatchStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchLogStore for MemoryBatchStore {
    fn put(&self, entry: BatchEntry) -> StoreResult<()> {
        self.entries.write().insert(entry.id, entry);
        Ok(())
    }

    fn get(&self, id: &BatchId) -> Option<BatchEntry> {
        self.entries.read().get(id).cloned()
    }

    fn scan_all(&self) -> BatchScan<'_> {
        let ids = self.entries.read().keys().copied().collect();
        BatchScan::new(ids, move |id| self.get(id))
    }

    fn delete(&self, id: &BatchId) -> StoreResult<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn count(&self) -> u64 {
        self.entries.read().len() as u64
    }
}
