//! The write-path seam
//!
//! The batch log hands mutations back to the normal write path, both for the
//! coordinator's direct delivery and for replay. Implementations decide where
//! a mutation lands (local tables, remote replicas); the batch log only needs
//! a synchronous "apply and acknowledge" call.

use crate::error::WriteResult;
use crate::timestamp::Timestamp;
use crate::types::{Mutation, TableRef};

/// Normal write entry point.
///
/// Thread safety: called concurrently from the replay apply pool and from
/// writers, so implementations must be `Send + Sync`.
///
/// # Idempotence
///
/// `apply` must merge by timestamp with last-write-wins semantics. The batch
/// log re-applies a mutation with the same timestamp after a crash between
/// apply and delete, and relies on the merge to absorb the duplicate.
pub trait WritePath: Send + Sync {
    /// Apply one mutation with the given timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the mutation could not be applied. The caller
    /// treats any error as "not delivered".
    fn apply(&self, mutation: &Mutation, timestamp: Timestamp) -> WriteResult<()>;

    /// Time at which `table` was last truncated, if ever.
    ///
    /// Replay drops mutations for a table truncated at or after the batch's
    /// write time, so truncated data does not resurface.
    fn truncated_at(&self, table: &TableRef) -> Option<Timestamp> {
        let _ = table;
        None
    }
}

impl<W: WritePath + ?Sized> WritePath for std::sync::Arc<W> {
    fn apply(&self, mutation: &Mutation, timestamp: Timestamp) -> WriteResult<()> {
        (**self).apply(mutation, timestamp)
    }

    fn truncated_at(&self, table: &TableRef) -> Option<Timestamp> {
        (**self).truncated_at(table)
    }
}
