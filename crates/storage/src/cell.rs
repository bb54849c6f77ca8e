//! Timestamped cells and the last-write-wins reconcile rule

use batchlog_core::Timestamp;
use std::cmp::Ordering;

/// A stored cell: either a value or a tombstone, tagged with its write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    timestamp: Timestamp,
    /// `None` marks a tombstone
    value: Option<Vec<u8>>,
}

impl Cell {
    /// A live cell
    pub fn live(timestamp: Timestamp, value: Vec<u8>) -> Self {
        Cell {
            timestamp,
            value: Some(value),
        }
    }

    /// A deletion marker
    pub fn tombstone(timestamp: Timestamp) -> Self {
        Cell {
            timestamp,
            value: None,
        }
    }

    /// Write time of the cell
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Value, or `None` for a tombstone
    #[inline]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Whether this cell is a deletion marker
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Whether `self` wins against `existing` under last-write-wins.
    ///
    /// Higher timestamp wins. On a tie a tombstone beats a value, and between
    /// two values the greater byte string wins, so every replica converges
    /// regardless of arrival order. Equal cells never supersede each other,
    /// which is what makes re-applying the same write a no-op.
    pub fn supersedes(&self, existing: &Cell) -> bool {
        match self.timestamp.cmp(&existing.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match (&self.value, &existing.value) {
                (None, Some(_)) => true,
                (Some(_), None) | (None, None) => false,
                (Some(new), Some(old)) => new > old,
            },
        }
    }
}
