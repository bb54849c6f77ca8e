//! Error types at the store and write-path boundaries
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.

use crate::types::{BatchId, TableRef};
use std::io;
use thiserror::Error;

/// Result type for batch log store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for write path operations
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Failure of the durable batch log store.
///
/// Propagated to the submitter: losing a submission silently would break
/// the at-least-once guarantee.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the underlying file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data did not match the expected layout
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Entry does not fit in a single log record
    #[error("Batch entry too large: {size} bytes, limit is {max}")]
    EntryTooLarge {
        /// Encoded record size
        size: u64,
        /// Largest record the log accepts
        max: u64,
    },

    /// The store was closed or is otherwise unavailable
    #[error("Batch log store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the normal write path while applying a mutation.
///
/// Scoped to a single batch during replay: the batch stays in the log and is
/// retried on the next pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The target table does not exist
    #[error("Unknown table: {0}")]
    UnknownTable(TableRef),

    /// A replica could not be reached or rejected the write
    #[error("Replica unavailable: {0}")]
    Unavailable(String),

    /// The apply attempt exceeded its deadline
    #[error("Write for batch {batch_id} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Batch whose mutation timed out
        batch_id: BatchId,
        /// Time waited before giving up
        elapsed_ms: u64,
    },

    /// Any other write path failure
    #[error("Write failed: {0}")]
    Other(String),
}
