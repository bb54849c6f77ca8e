//! On-disk formats for the batch log
//!
//! - `record`: file header and CRC-framed put/delete records

pub mod record;

pub use record::{
    FormatError, LogHeader, LogRecord, FILE_FORMAT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC,
    MAX_RECORD_SIZE,
};
