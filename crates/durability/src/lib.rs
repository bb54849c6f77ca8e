//! Durability layer for the batch log
//!
//! This crate handles everything between a submitted batch and the disk:
//!
//! - Codec: version-tagged (de)serialization of mutation sets
//! - Entry: the persisted batch entry (id, write timestamp, version, payload)
//! - Format: the CRC-protected on-disk record layout
//! - Store: the `BatchLogStore` seam with in-memory and file-backed implementations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec; // Version-tagged mutation codecs and the registry
pub mod entry; // BatchEntry
pub mod format; // On-disk log header and record layout
pub mod store; // BatchLogStore trait, memory and file stores

pub use codec::{
    BincodeFormat, CodecError, CodecVersion, MessagePackFormat, MutationCodec, MutationFormat,
};
pub use entry::BatchEntry;
pub use format::{
    FormatError, LogHeader, LogRecord, FILE_FORMAT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC,
};
pub use store::{
    BatchLogStore, BatchScan, FileBatchStore, MemoryBatchStore, StoreOptions, SyncMode,
    LOG_FILE_NAME,
};
