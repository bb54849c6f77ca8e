//! Sharded table storage with last-write-wins merging
//!
//! # Design
//!
//! - DashMap keyed by `(table, partition key)`: writes only lock the target shard
//! - FxHashMap of cells per partition: O(1) lookups by `(clustering, column)`
//! - Partition deletions are recorded as a timestamp that shadows older cells
//! - Truncation drops every partition of a table and records when it happened
//!
//! Every merge is last-write-wins by timestamp, so re-applying a mutation with
//! the timestamp it was first applied with leaves the store unchanged.

use batchlog_core::{Mutation, MutationOp, TableRef, Timestamp, WriteError, WritePath, WriteResult};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::cell::Cell;

type PartitionKey = (TableRef, Vec<u8>);

/// Cells of one partition plus its deletion marker.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Cells written at or before this time are shadowed
    deleted_at: Option<Timestamp>,
    cells: FxHashMap<(String, String), Cell>,
}

impl Partition {
    fn merge(&mut self, clustering: &str, column: &str, candidate: Cell) {
        let slot = (clustering.to_string(), column.to_string());
        let wins = self
            .cells
            .get(&slot)
            .map_or(true, |existing| candidate.supersedes(existing));
        if wins {
            self.cells.insert(slot, candidate);
        }
    }

    fn delete(&mut self, timestamp: Timestamp) {
        self.deleted_at = Some(match self.deleted_at {
            Some(existing) => existing.max(timestamp),
            None => timestamp,
        });
    }

    fn visible(&self, cell: &Cell) -> bool {
        if cell.is_tombstone() {
            return false;
        }
        match self.deleted_at {
            Some(deleted) => cell.timestamp() > deleted,
            None => true,
        }
    }

    /// Live value of one cell
    pub fn get(&self, clustering: &str, column: &str) -> Option<&[u8]> {
        self.cells
            .get(&(clustering.to_string(), column.to_string()))
            .filter(|cell| self.visible(cell))
            .and_then(Cell::value)
    }

    /// Whether the partition has any live cell
    pub fn is_live(&self) -> bool {
        self.cells.values().any(|cell| self.visible(cell))
    }
}

#[derive(Debug, Default)]
struct TableMeta {
    truncated_at: Option<Timestamp>,
}

/// Table store implementing the normal write path.
///
/// Tables must be created before they accept writes; writing to an unknown
/// table fails with [`WriteError::UnknownTable`].
#[derive(Debug, Default)]
pub struct TableStore {
    tables: DashMap<TableRef, TableMeta>,
    partitions: DashMap<PartitionKey, Partition>,
    /// Mutations accepted by `apply` (including no-op re-applications)
    applied: AtomicU64,
}

impl TableStore {
    /// Empty store with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Creating an existing table is a no-op.
    pub fn create_table(&self, table: TableRef) {
        self.tables.entry(table).or_default();
    }

    /// Whether a table exists
    pub fn has_table(&self, table: &TableRef) -> bool {
        self.tables.contains_key(table)
    }

    /// Drop every partition of `table` and record the truncation time.
    pub fn truncate(&self, table: &TableRef, at: Timestamp) -> WriteResult<()> {
        let mut meta = self
            .tables
            .get_mut(table)
            .ok_or_else(|| WriteError::UnknownTable(table.clone()))?;
        meta.truncated_at = Some(meta.truncated_at.map_or(at, |t| t.max(at)));
        drop(meta);

        self.partitions.retain(|(t, _), _| t != table);
        debug!(table = %table, at = %at, "Truncated table");
        Ok(())
    }

    /// Live value of a single cell
    pub fn get(&self, table: &TableRef, key: &[u8], clustering: &str, column: &str) -> Option<Vec<u8>> {
        self.partitions
            .get(&(table.clone(), key.to_vec()))
            .and_then(|p| p.get(clustering, column).map(<[u8]>::to_vec))
    }

    /// Live columns of one row, ordered by column name
    pub fn row(&self, table: &TableRef, key: &[u8], clustering: &str) -> BTreeMap<String, Vec<u8>> {
        let mut row = BTreeMap::new();
        if let Some(partition) = self.partitions.get(&(table.clone(), key.to_vec())) {
            for ((c, column), cell) in partition.cells.iter() {
                if c == clustering && partition.visible(cell) {
                    if let Some(value) = cell.value() {
                        row.insert(column.clone(), value.to_vec());
                    }
                }
            }
        }
        row
    }

    /// Number of partitions of `table` with at least one live cell
    pub fn live_partitions(&self, table: &TableRef) -> usize {
        self.partitions
            .iter()
            .filter(|entry| &entry.key().0 == table && entry.value().is_live())
            .count()
    }

    /// Total mutations accepted by `apply`
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl WritePath for TableStore {
    fn apply(&self, mutation: &Mutation, timestamp: Timestamp) -> WriteResult<()> {
        if !self.tables.contains_key(&mutation.table) {
            return Err(WriteError::UnknownTable(mutation.table.clone()));
        }

        let mut partition = self
            .partitions
            .entry((mutation.table.clone(), mutation.key.clone()))
            .or_default();

        for op in &mutation.ops {
            match op {
                MutationOp::Upsert {
                    clustering,
                    column,
                    value,
                } => partition.merge(clustering, column, Cell::live(timestamp, value.clone())),
                MutationOp::DeleteCell { clustering, column } => {
                    partition.merge(clustering, column, Cell::tombstone(timestamp))
                }
                MutationOp::DeletePartition => partition.delete(timestamp),
            }
        }

        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn truncated_at(&self, table: &TableRef) -> Option<Timestamp> {
        self.tables.get(table).and_then(|meta| meta.truncated_at)
    }
}
