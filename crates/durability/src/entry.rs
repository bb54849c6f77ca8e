//! Persisted batch entries

use crate::codec::CodecVersion;
use batchlog_core::{BatchId, Timestamp};
use std::time::Duration;

/// One logged batch.
///
/// Created when a multi-partition write is submitted, persisted before the
/// coordinator attempts direct delivery, and deleted once delivery (direct or
/// replayed) is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Time-ordered unique id, immutable
    pub id: BatchId,
    /// Submission time; also the apply timestamp of every mutation
    pub write_timestamp: Timestamp,
    /// Codec version the payload was written with
    pub version: CodecVersion,
    /// Opaque serialized mutation set
    pub payload: Vec<u8>,
}

impl BatchEntry {
    /// Create an entry
    pub fn new(id: BatchId, write_timestamp: Timestamp, version: CodecVersion, payload: Vec<u8>) -> Self {
        Self {
            id,
            write_timestamp,
            version,
            payload,
        }
    }

    /// Age of the entry at `now`, or `None` if it was written in the future
    pub fn age(&self, now: Timestamp) -> Option<Duration> {
        now.duration_since(self.write_timestamp)
    }

    /// Whether the entry has outlived its direct-delivery grace period.
    ///
    /// An entry is eligible only when `now - write_timestamp >= timeout`.
    pub fn is_eligible(&self, now: Timestamp, timeout: Duration) -> bool {
        self.age(now).map_or(false, |age| age >= timeout)
    }
}
