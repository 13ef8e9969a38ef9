//! Legacy SGML submission containers
//!
//! `decoder` turns raw container bytes into a header tree and documents,
//! `submission` gives them identity, `metadata` is their on-disk description.

pub mod decoder;
pub mod errors;
pub mod metadata;
pub mod submission;
pub mod uudecode;
pub mod value;

pub use decoder::{decode, DecodeOptions, DecodedContainer, RawDocument};
pub use errors::{DecodeError, DecodeResult};
pub use metadata::{SubmissionMetadata, METADATA_FILE};
pub use submission::{standardize_key, Document, DocumentDescriptor, Submission};
pub use value::{OrderedMap, Value};

use crate::accession::Accession;

/// Decode a container into a submission in one step
pub fn decode_submission(
    input: &[u8],
    accession: Option<Accession>,
    options: DecodeOptions,
) -> DecodeResult<Submission> {
    let decoded = decode(input, options)?;
    Submission::from_decoded(accession, decoded)
}
