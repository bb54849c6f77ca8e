//! Built-in mutation formats
//!
//! - `BincodeFormat` (v1): the legacy layout, fixed-width bincode
//! - `MessagePackFormat` (v2): the current layout, compact MessagePack
//!
//! Both decoders read through a cursor and reject trailing bytes, so a
//! payload decoded under the wrong version fails instead of yielding a
//! plausible prefix.
//!
//! Payloads are untrusted on decode. Neither decoder allocates from a length
//! prefix beyond the bytes actually present, so a corrupt prefix fails as
//! `Malformed` instead of exhausting memory.

use super::traits::{CodecError, CodecVersion, MutationFormat};
use batchlog_core::Mutation;
use bincode::Options;
use serde::Deserialize;
use std::io::Cursor;

fn check_consumed(version: CodecVersion, cursor: &Cursor<&[u8]>) -> Result<(), CodecError> {
    let len = cursor.get_ref().len();
    let consumed = cursor.position() as usize;
    if consumed != len {
        return Err(CodecError::malformed(
            version,
            len,
            format!("{} trailing bytes after mutation set", len - consumed),
        ));
    }
    Ok(())
}

/// Legacy v1 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeFormat;

impl MutationFormat for BincodeFormat {
    fn version(&self) -> CodecVersion {
        CodecVersion::V1
    }

    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, mutations: &[Mutation]) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(mutations).map_err(|e| CodecError::Encode {
            version: self.version(),
            detail: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Mutation>, CodecError> {
        let mut cursor = Cursor::new(bytes);
        // Same layout as `bincode::serialize`, with reads capped at the input size
        let mutations: Vec<Mutation> = bincode::options()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(bytes.len() as u64)
            .deserialize_from(&mut cursor)
            .map_err(|e| CodecError::malformed(self.version(), bytes.len(), e.to_string()))?;
        check_consumed(self.version(), &cursor)?;
        Ok(mutations)
    }
}

/// Current v2 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackFormat;

impl MutationFormat for MessagePackFormat {
    fn version(&self) -> CodecVersion {
        CodecVersion::V2
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, mutations: &[Mutation]) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(mutations).map_err(|e| CodecError::Encode {
            version: self.version(),
            detail: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Mutation>, CodecError> {
        let mut de = rmp_serde::Deserializer::new(Cursor::new(bytes));
        let mutations = Vec::<Mutation>::deserialize(&mut de)
            .map_err(|e| CodecError::malformed(self.version(), bytes.len(), e.to_string()))?;
        let consumed = de.position() as usize;
        if consumed != bytes.len() {
            return Err(CodecError::malformed(
                self.version(),
                bytes.len(),
                format!("{} trailing bytes after mutation set", bytes.len() - consumed),
            ));
        }
        Ok(mutations)
    }
}
