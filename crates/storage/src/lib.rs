//! Table storage behind the normal write path
//!
//! This crate implements the write path the batch log replays into:
//! - Cell: a timestamped value or tombstone with the last-write-wins rule
//! - TableStore: DashMap-sharded partitions, truncation records, read helpers
//!
//! `TableStore` implements [`batchlog_core::WritePath`], so it can serve as the
//! local replica for both direct delivery and replay.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod sharded;

pub use cell::Cell;
pub use sharded::{Partition, TableStore};
