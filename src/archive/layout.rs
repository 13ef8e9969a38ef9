//! Byte layout of archive members
//!
//! Every tar entry is a 512-byte header followed by its data padded to a
//! 512-byte boundary. A member path longer than the 100-byte name field is
//! preceded by a GNU long-name entry whose data is the path plus a NUL.
//! Offsets here are absolute positions in the archive file.
//!
//! `start_byte`/`end_byte` live inside metadata.json, whose own size shifts
//! the documents that follow it, so the layout is solved by iteration: lay
//! out with a guessed metadata size, serialize, repeat until the metadata
//! entry's padded size stops changing.

use super::errors::{ArchiveError, ArchiveResult};
use crate::sgml::SubmissionMetadata;

pub const BLOCK: u64 = 512;

/// Two zero blocks end a tar stream
pub const TRAILER: u64 = 2 * BLOCK;

/// Width of the name field in a tar header
const NAME_FIELD: usize = 100;

const MAX_ITERATIONS: usize = 16;

/// Round up to the next block boundary
pub fn padded(len: u64) -> u64 {
    len.div_ceil(BLOCK) * BLOCK
}

/// Header bytes written before an entry's data, long-name record included
pub fn header_span(path: &str) -> u64 {
    if path.len() > NAME_FIELD {
        2 * BLOCK + padded(path.len() as u64 + 1)
    } else {
        BLOCK
    }
}

/// Total bytes one entry occupies
pub fn entry_span(path: &str, size: u64) -> u64 {
    header_span(path) + padded(size)
}

/// A member to be written after the metadata entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub path: String,
    pub data: Vec<u8>,
}

/// Fill in `start_byte`/`end_byte` for a submission starting at `start`.
///
/// `members[i]` must correspond to `metadata.documents[i]`. Returns the
/// serialized metadata and the position just past the last member.
pub fn assign_offsets(
    start: u64,
    metadata_path: &str,
    metadata: &mut SubmissionMetadata,
    members: &[Member],
) -> ArchiveResult<(Vec<u8>, u64)> {
    if members.len() != metadata.documents.len() {
        return Err(ArchiveError::layout(format!(
            "{} members for {} documents",
            members.len(),
            metadata.documents.len()
        )));
    }

    let mut assumed_len = 0u64;
    for _ in 0..MAX_ITERATIONS {
        let mut pos = start + entry_span(metadata_path, assumed_len);
        for (doc, member) in metadata.documents.iter_mut().zip(members) {
            let data_start = pos + header_span(&member.path);
            doc.start_byte = Some(data_start);
            doc.end_byte = Some(data_start + member.data.len() as u64);
            pos += entry_span(&member.path, member.data.len() as u64);
        }

        let json = metadata
            .to_json()
            .map_err(|e| ArchiveError::metadata(format!("Failed to serialize metadata: {}", e)))?;
        if padded(json.len() as u64) == padded(assumed_len) && assumed_len > 0 {
            return Ok((json, pos));
        }
        assumed_len = json.len() as u64;
    }

    Err(ArchiveError::layout(format!(
        "Metadata size for {} did not settle after {} passes",
        metadata.accession, MAX_ITERATIONS
    )))
}
