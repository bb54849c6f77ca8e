//! Batchlog - durable batch log with background replay
//!
//! A multi-partition write is logged as one batch before the coordinator
//! delivers it. If the coordinator dies before confirming delivery, a
//! background replay pass re-applies the batch once it has aged past the
//! replay timeout. Delivery is at-least-once; the write path's
//! last-write-wins merge absorbs duplicates.
//!
//! # Quick Start
//!
//! ```ignore
//! use batchlog::{BatchlogConfig, BatchlogManager, Mutation, TableRef, Timestamp};
//!
//! let manager = BatchlogManager::open("data/batchlog", BatchlogConfig::default(), write_path)?;
//! manager.start()?;
//!
//! let entry = manager.submit(&mutations, Timestamp::now())?;
//! if delivered_to_all_replicas {
//!     manager.remove(&entry.id)?;
//! }
//! ```
//!
//! # Architecture
//!
//! - [`batchlog_core`]: ids, timestamps, mutations and the `WritePath` seam
//! - [`batchlog_durability`]: codecs, entries and the `BatchLogStore` implementations
//! - [`batchlog_engine`]: the manager, replay passes and the scheduler
//! - [`batchlog_storage`]: a last-write-wins table store usable as the write path

#![warn(missing_docs)]
#![warn(clippy::all)]

mod global;

pub use global::{global, install_global};

pub use batchlog_core::{
    BatchId, Mutation, MutationOp, StoreError, TableRef, Timestamp, WriteError, WritePath,
};
pub use batchlog_durability::{
    BatchEntry, BatchLogStore, CodecError, CodecVersion, FileBatchStore, MemoryBatchStore,
    MutationCodec, StoreOptions, SyncMode,
};
pub use batchlog_engine::{
    BatchlogConfig, BatchlogError, BatchlogManager, BatchlogMetrics, ReplayError, ReplayHandle,
    ReplayReport,
};
pub use batchlog_storage::TableStore;
