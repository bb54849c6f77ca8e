//! Version registry: dispatch a payload to the format it was written with.

use super::formats::{BincodeFormat, MessagePackFormat};
use super::traits::{CodecError, CodecVersion, MutationFormat};
use batchlog_core::Mutation;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Encodes and decodes mutation sets by version.
///
/// Holds a map from version tag to format. Encoding for new batches uses the
/// current version; decoding looks up whatever version the entry was stored
/// with and fails with [`CodecError::UnsupportedVersion`] for unknown tags.
///
/// # Example
///
/// ```
/// use batchlog_core::{Mutation, TableRef};
/// use batchlog_durability::{CodecVersion, MutationCodec};
///
/// let codec = MutationCodec::default();
/// let mutations = vec![Mutation::new(TableRef::new("ks", "t"), b"k".to_vec())];
/// let bytes = codec.encode(&mutations, CodecVersion::CURRENT).unwrap();
/// assert_eq!(codec.decode(&bytes, CodecVersion::CURRENT).unwrap(), mutations);
/// ```
#[derive(Clone)]
pub struct MutationCodec {
    formats: BTreeMap<CodecVersion, Arc<dyn MutationFormat>>,
    current: CodecVersion,
}

impl MutationCodec {
    /// Registry containing only `current`, which new batches are written with.
    pub fn new(current: Arc<dyn MutationFormat>) -> Self {
        let version = current.version();
        let mut formats = BTreeMap::new();
        formats.insert(version, current);
        Self {
            formats,
            current: version,
        }
    }

    /// Register another format, typically a historical one.
    ///
    /// Returns the format previously registered under the same version.
    pub fn register(&mut self, format: Arc<dyn MutationFormat>) -> Option<Arc<dyn MutationFormat>> {
        self.formats.insert(format.version(), format)
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_format(mut self, format: Arc<dyn MutationFormat>) -> Self {
        self.register(format);
        self
    }

    /// Version used for new batches
    pub fn current_version(&self) -> CodecVersion {
        self.current
    }

    /// All registered versions, ascending
    pub fn versions(&self) -> Vec<CodecVersion> {
        self.formats.keys().copied().collect()
    }

    /// Whether a version can be decoded
    pub fn supports(&self, version: CodecVersion) -> bool {
        self.formats.contains_key(&version)
    }

    fn format(&self, version: CodecVersion) -> Result<&Arc<dyn MutationFormat>, CodecError> {
        self.formats
            .get(&version)
            .ok_or(CodecError::UnsupportedVersion(version))
    }

    /// Serialize `mutations` in the layout of `version`.
    pub fn encode(&self, mutations: &[Mutation], version: CodecVersion) -> Result<Vec<u8>, CodecError> {
        self.format(version)?.encode(mutations)
    }

    /// Deserialize a payload stored under `version`.
    pub fn decode(&self, bytes: &[u8], version: CodecVersion) -> Result<Vec<Mutation>, CodecError> {
        self.format(version)?.decode(bytes)
    }
}

impl Default for MutationCodec {
    /// Current MessagePack format plus the legacy bincode format.
    fn default() -> Self {
        MutationCodec::new(Arc::new(MessagePackFormat)).with_format(Arc::new(BincodeFormat))
    }
}

impl std::fmt::Debug for MutationCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .formats
            .iter()
            .map(|(v, format)| format!("{}={}", v, format.name()))
            .collect();
        f.debug_struct("MutationCodec")
            .field("current", &self.current)
            .field("formats", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlog_core::TableRef;
    use proptest::prelude::*;

    fn mutation_strategy() -> impl Strategy<Value = Mutation> {
        let op = prop_oneof![
            ("[a-z]{0,6}", "[a-z]{1,6}", prop::collection::vec(any::<u8>(), 0..16)).prop_map(
                |(clustering, column, value)| batchlog_core::MutationOp::Upsert {
                    clustering,
                    column,
                    value
                }
            ),
            ("[a-z]{0,6}", "[a-z]{1,6}").prop_map(|(clustering, column)| {
                batchlog_core::MutationOp::DeleteCell { clustering, column }
            }),
            Just(batchlog_core::MutationOp::DeletePartition),
        ];
        (
            "[a-z]{1,8}",
            "[a-z]{1,8}",
            prop::collection::vec(any::<u8>(), 0..12),
            prop::collection::vec(op, 0..6),
        )
            .prop_map(|(ks, table, key, ops)| Mutation {
                table: TableRef::new(ks, table),
                key,
                ops,
            })
    }

    proptest! {
        #[test]
        fn roundtrip_every_registered_version(mutations in prop::collection::vec(mutation_strategy(), 0..8)) {
            let codec = MutationCodec::default();
            for version in codec.versions() {
                let bytes = codec.encode(&mutations, version).unwrap();
                prop_assert_eq!(codec.decode(&bytes, version).unwrap(), mutations.clone());
            }
        }
    }

    #[test]
    fn test_default_registry() {
        let codec = MutationCodec::default();
        assert_eq!(codec.current_version(), CodecVersion::CURRENT);
        assert_eq!(codec.versions(), vec![CodecVersion::V1, CodecVersion::V2]);
        assert!(codec.supports(CodecVersion::V1));
    }

    #[test]
    fn test_unsupported_version() {
        let codec = MutationCodec::default();
        assert_eq!(
            codec.decode(b"anything", CodecVersion(99)),
            Err(CodecError::UnsupportedVersion(CodecVersion(99)))
        );
        assert_eq!(
            codec.encode(&[], CodecVersion(99)),
            Err(CodecError::UnsupportedVersion(CodecVersion(99)))
        );
    }

    #[test]
    fn test_current_only_registry_rejects_legacy() {
        let codec = MutationCodec::new(Arc::new(MessagePackFormat));
        let legacy = BincodeFormat.encode(&[]).unwrap();
        assert!(matches!(
            codec.decode(&legacy, CodecVersion::V1),
            Err(CodecError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut codec = MutationCodec::default();
        let previous = codec.register(Arc::new(BincodeFormat));
        assert!(previous.is_some());
        assert_eq!(codec.versions().len(), 2);
    }

    #[test]
    fn test_debug_lists_formats() {
        let dbg = format!("{:?}", MutationCodec::default());
        assert!(dbg.contains("v1=bincode"));
        assert!(dbg.contains("v2=msgpack"));
    }
}
