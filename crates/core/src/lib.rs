//! Core types and traits for the batch log
//!
//! This crate defines the foundational types shared by every layer:
//! - Timestamp: microsecond-precision write time
//! - BatchId: time-ordered identifier of a logged batch
//! - TableRef / Mutation / MutationOp: the per-partition updates a batch carries
//! - WritePath: the normal write entry point used for delivery and replay
//! - Error types for the store and write path boundaries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod timestamp;
pub mod traits;
pub mod types;

pub use error::{StoreError, StoreResult, WriteError, WriteResult};
pub use timestamp::Timestamp;
pub use traits::WritePath;
pub use types::{BatchId, Mutation, MutationOp, TableRef};
