//! Batch log file and record format.
//!
//! The log is a single append-only file named `batchlog.log`.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (16 bytes)                  │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ Record 2                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Kind (1) │ Body (variable)         │ CRC32 (4)│
//! └─────────────────┴──────────┴─────────────────────────┴──────────┘
//!
//! Length counts kind + body + CRC. The CRC covers kind + body.
//!
//! Put body:
//! ┌──────────────┬───────────────┬─────────────┬──────────────┬───────────┐
//! │ BatchId (16) │ Write TS (8)  │ Version (4) │ Len (4)      │ Payload   │
//! └──────────────┴───────────────┴─────────────┴──────────────┴───────────┘
//!
//! Delete body:
//! ┌──────────────┐
//! │ BatchId (16) │
//! └──────────────┘
//! ```

use crate::codec::CodecVersion;
use crate::entry::BatchEntry;
use batchlog_core::{BatchId, Timestamp};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Magic bytes identifying a batch log file: "BLOG"
pub const FILE_MAGIC: [u8; 4] = *b"BLOG";

/// Current file format version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes
pub const FILE_HEADER_SIZE: usize = 16;

/// Upper bound on a single record, guards against garbage length prefixes
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// Batch log file header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Magic bytes: "BLOG"
    pub magic: [u8; 4],
    /// Format version for forward compatibility
    pub format_version: u32,
}

impl LogHeader {
    /// Header for a freshly created file
    pub fn new() -> Self {
        LogHeader {
            magic: FILE_MAGIC,
            format_version: FILE_FORMAT_VERSION,
        }
    }

    /// Serialize header to bytes. The trailing 8 bytes are reserved (zero).
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut bytes[4..8], self.format_version);
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; FILE_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        LogHeader {
            magic,
            format_version: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    /// Magic matches and the version is one we can read
    pub fn is_valid(&self) -> bool {
        self.magic == FILE_MAGIC && self.format_version == FILE_FORMAT_VERSION
    }
}

impl Default for LogHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One record of the batch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Entry written (or overwritten, keyed by id)
    Put(BatchEntry),
    /// Entry removed
    Delete(BatchId),
}

impl LogRecord {
    /// Id the record refers to
    pub fn id(&self) -> BatchId {
        match self {
            LogRecord::Put(entry) => entry.id,
            LogRecord::Delete(id) => *id,
        }
    }

    /// Size of the framed record: length prefix, kind, body and CRC.
    pub fn encoded_len(&self) -> u64 {
        let body = match self {
            LogRecord::Put(entry) => 32 + entry.payload.len() as u64,
            LogRecord::Delete(_) => 16,
        };
        4 + 1 + body + 4
    }

    /// Serialize to the framed on-disk representation.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::RecordTooLarge`] if the record would exceed
    /// [`MAX_RECORD_SIZE`], which the reader refuses.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let framed = self.encoded_len() - 4;
        if framed > u64::from(MAX_RECORD_SIZE) {
            return Err(FormatError::RecordTooLarge(framed));
        }
        let length = u32::try_from(framed).map_err(|_| FormatError::RecordTooLarge(framed))?;

        let mut body = Vec::with_capacity(length as usize - 5);
        let kind = match self {
            LogRecord::Put(entry) => {
                let payload_len = u32::try_from(entry.payload.len())
                    .map_err(|_| FormatError::RecordTooLarge(framed))?;
                body.extend_from_slice(entry.id.as_bytes());
                body.extend_from_slice(&entry.write_timestamp.as_micros().to_le_bytes());
                body.extend_from_slice(&entry.version.as_u32().to_le_bytes());
                body.extend_from_slice(&payload_len.to_le_bytes());
                body.extend_from_slice(&entry.payload);
                KIND_PUT
            }
            LogRecord::Delete(id) => {
                body.extend_from_slice(id.as_bytes());
                KIND_DELETE
            }
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut out = Vec::with_capacity(4 + length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.push(kind);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Parse one record from the front of `bytes`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(LogRecord, usize), FormatError> {
        if bytes.len() < 4 {
            return Err(FormatError::InsufficientData);
        }
        let length = LittleEndian::read_u32(&bytes[0..4]);
        if length < 5 {
            return Err(FormatError::InvalidBody(format!("record length {} too small", length)));
        }
        if length > MAX_RECORD_SIZE {
            return Err(FormatError::RecordTooLarge(u64::from(length)));
        }
        let total = 4 + length as usize;
        if bytes.len() < total {
            return Err(FormatError::InsufficientData);
        }

        let framed = &bytes[4..total];
        let (content, crc_bytes) = framed.split_at(framed.len() - 4);
        let expected = LittleEndian::read_u32(crc_bytes);
        let computed = crc32fast::hash(content);
        if expected != computed {
            return Err(FormatError::ChecksumMismatch { expected, computed });
        }

        let kind = content[0];
        let mut body = Cursor::new(&content[1..]);
        let record = match kind {
            KIND_PUT => {
                let id = read_id(&mut body)?;
                let write_timestamp = Timestamp::from_micros(body.read_u64::<LittleEndian>().map_err(invalid)?);
                let version = CodecVersion(body.read_u32::<LittleEndian>().map_err(invalid)?);
                let payload_len = body.read_u32::<LittleEndian>().map_err(invalid)? as usize;
                let mut payload = vec![0u8; payload_len.min(content.len())];
                body.read_exact(&mut payload).map_err(invalid)?;
                LogRecord::Put(BatchEntry::new(id, write_timestamp, version, payload))
            }
            KIND_DELETE => LogRecord::Delete(read_id(&mut body)?),
            other => return Err(FormatError::UnknownKind(other)),
        };

        if body.position() as usize != content.len() - 1 {
            return Err(FormatError::InvalidBody("trailing bytes in record body".to_string()));
        }
        Ok((record, total))
    }
}

fn read_id(body: &mut Cursor<&[u8]>) -> Result<BatchId, FormatError> {
    let mut id = [0u8; 16];
    body.read_exact(&mut id).map_err(invalid)?;
    Ok(BatchId::from_bytes(id))
}

fn invalid(e: std::io::Error) -> FormatError {
    FormatError::InvalidBody(e.to_string())
}

/// Record parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Not enough bytes for a complete record (torn tail)
    #[error("Insufficient data for record")]
    InsufficientData,

    /// CRC32 did not match
    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the record
        expected: u32,
        /// CRC computed over the record content
        computed: u32,
    },

    /// Unknown record kind byte
    #[error("Unknown record kind: {0}")]
    UnknownKind(u8),

    /// Record length exceeds [`MAX_RECORD_SIZE`]
    #[error("Record too large: {0} bytes")]
    RecordTooLarge(u64),

    /// Body did not match the layout of its kind
    #[error("Invalid record body: {0}")]
    InvalidBody(String),
}
