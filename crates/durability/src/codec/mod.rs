//! Mutation codecs
//!
//! Every batch payload is written with a version tag. The registry maps tags
//! to formats so entries written before an upgrade stay readable after it.

mod formats;
mod registry;
mod traits;

pub use formats::{BincodeFormat, MessagePackFormat};
pub use registry::MutationCodec;
pub use traits::{CodecError, CodecVersion, MutationFormat};
