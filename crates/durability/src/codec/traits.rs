//! Mutation format trait definitions.

use batchlog_core::Mutation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format version persisted next to every batch payload.
///
/// Historical entries keep the version they were written with, so a payload
/// written before an upgrade remains decodable after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodecVersion(pub u32);

impl CodecVersion {
    /// Legacy layout (bincode, fixed-width integers)
    pub const V1: CodecVersion = CodecVersion(1);

    /// Current layout (MessagePack)
    pub const V2: CodecVersion = CodecVersion(2);

    /// Version new batches are written with
    pub const CURRENT: CodecVersion = CodecVersion::V2;

    /// Raw version number
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CodecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One registered wire format for mutation sets.
///
/// # Thread Safety
///
/// Formats must be `Send + Sync`; the registry is shared between submitters
/// and the replay pass.
///
/// # Determinism
///
/// `encode` must be deterministic for a given input, and
/// `decode(encode(m)) == m` must hold for every mutation set.
pub trait MutationFormat: Send + Sync {
    /// Version tag this format is registered under
    fn version(&self) -> CodecVersion;

    /// Short human-readable name, used in logs
    fn name(&self) -> &'static str;

    /// Serialize a mutation set.
    fn encode(&self, mutations: &[Mutation]) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a mutation set.
    ///
    /// Returns [`CodecError::Malformed`] if the bytes do not match this
    /// format's layout, including trailing garbage after a valid prefix.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Mutation>, CodecError>;
}

/// Codec errors.
///
/// Both decode variants are scoped to a single entry during replay: the
/// entry is logged and left in place, the pass continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// No format is registered for the version
    #[error("Unsupported codec version: {0}")]
    UnsupportedVersion(CodecVersion),

    /// The payload does not match the declared version's layout.
    ///
    /// Carries the version and payload length so callers can tell a
    /// version mix-up from plain corruption.
    #[error("Malformed payload (version={version}, len={len}): {detail}")]
    Malformed {
        /// Version the payload was decoded as
        version: CodecVersion,
        /// Payload length in bytes
        len: usize,
        /// What went wrong
        detail: String,
    },

    /// The mutation set could not be serialized
    #[error("Encode error (version={version}): {detail}")]
    Encode {
        /// Version that was being written
        version: CodecVersion,
        /// What went wrong
        detail: String,
    },
}

impl CodecError {
    /// Create a malformed-payload error with full diagnostic context.
    pub fn malformed(version: CodecVersion, len: usize, detail: impl Into<String>) -> Self {
        CodecError::Malformed {
            version,
            len,
            detail: detail.into(),
        }
    }
}
