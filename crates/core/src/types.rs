//! Identifiers and the mutation model carried by a batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a logged batch.
///
/// Backed by a UUID v7, so ids sort by creation time. The store iterates in
/// id order, which makes a replay pass visit older batches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Allocate a new time-ordered id
    pub fn new() -> Self {
        BatchId(Uuid::now_v7())
    }

    /// Rebuild an id from its 16 raw bytes (as stored on disk)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        BatchId(Uuid::from_bytes(bytes))
    }

    /// Raw bytes of the id
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Keyspace the table lives in
    pub keyspace: String,
    /// Table name
    pub table: String,
}

impl TableRef {
    /// Create a table reference
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

/// One update inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    /// Write a cell value
    Upsert {
        /// Clustering (row) key within the partition
        clustering: String,
        /// Column name
        column: String,
        /// New value
        value: Vec<u8>,
    },
    /// Delete a single cell
    DeleteCell {
        /// Clustering (row) key within the partition
        clustering: String,
        /// Column name
        column: String,
    },
    /// Delete every cell of the partition written at or before the apply timestamp
    DeletePartition,
}

/// A set of updates to a single partition.
///
/// The batch log never interprets mutations. It only serializes them,
/// timestamps them and hands them back to the write path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target table
    pub table: TableRef,
    /// Partition key
    pub key: Vec<u8>,
    /// Updates, applied in order
    pub ops: Vec<MutationOp>,
}

impl Mutation {
    /// Empty mutation for a partition
    pub fn new(table: TableRef, key: impl Into<Vec<u8>>) -> Self {
        Self {
            table,
            key: key.into(),
            ops: Vec::new(),
        }
    }

    /// Add a cell write
    pub fn upsert(
        mut self,
        clustering: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.ops.push(MutationOp::Upsert {
            clustering: clustering.into(),
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Add a cell deletion
    pub fn delete_cell(mut self, clustering: impl Into<String>, column: impl Into<String>) -> Self {
        self.ops.push(MutationOp::DeleteCell {
            clustering: clustering.into(),
            column: column.into(),
        });
        self
    }

    /// Add a whole-partition deletion
    pub fn delete_partition(mut self) -> Self {
        self.ops.push(MutationOp::DeletePartition);
        self
    }
}
