//! Engine errors
//!
//! `BatchlogError` is what callers of the manager see. `ReplayError` describes
//! why a single entry was left in the log by a replay pass; it never reaches
//! writers and only shows up in logs, counters and [`crate::ReplayReport`].

use crate::config::ConfigError;
use batchlog_core::{StoreError, WriteError};
use batchlog_durability::CodecError;
use thiserror::Error;

/// Errors surfaced by [`crate::BatchlogManager`]
#[derive(Debug, Error)]
pub enum BatchlogError {
    /// The store could not write, delete or flush
    #[error("Batch log store error: {0}")]
    Store(#[from] StoreError),

    /// Mutations could not be encoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A replay pass ended without a report
    #[error("Replay pass aborted: {0}")]
    Replay(#[from] ReplayError),

    /// A worker or scheduler thread could not be spawned
    #[error("Failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    /// The manager has been shut down
    #[error("Batch log manager is shut down")]
    ShutDown,
}

/// Why an entry (or a whole pass) did not complete
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    /// The write path rejected a mutation
    #[error("Apply failed: {0}")]
    Apply(#[from] WriteError),

    /// Not every mutation was acknowledged before the deadline
    #[error("Apply timed out after {elapsed_ms}ms ({pending} mutations unacknowledged)")]
    Timeout {
        /// Time spent waiting
        elapsed_ms: u64,
        /// Mutations still outstanding
        pending: usize,
    },

    /// The apply pool refused work (queue full or shut down)
    #[error("Apply pool rejected work")]
    Backpressure,

    /// The pass thread panicked
    #[error("Replay pass panicked: {0}")]
    Panicked(String),

    /// The pass thread could not be spawned
    #[error("Failed to spawn replay thread: {0}")]
    Spawn(String),

    /// Replay was requested after shutdown
    #[error("Batch log manager is shut down")]
    ShutDown,
}
