//! # Loose Submission Storage
//!
//! One directory per submission:
//!
//! ```text
//! {output_dir}/
//! ├── 000095012309012345/
//! │   ├── metadata.json
//! │   ├── form10k.htm
//! │   └── ex99.txt
//! └── 000095012309012346.partial/   (in-flight write, removed on failure)
//! ```

mod errors;
mod loose;

pub use errors::{StorageError, StorageResult};
pub use loose::LooseStore;

use crate::accession::Accession;
use crate::sgml::{Submission, SubmissionMetadata};

/// A submission in its persisted shape: metadata plus document bytes in
/// descriptor order
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSubmission {
    pub metadata: SubmissionMetadata,
    pub contents: Vec<Vec<u8>>,
}

impl StoredSubmission {
    pub fn from_submission(submission: Submission) -> Self {
        let metadata = SubmissionMetadata::from_submission(&submission);
        let contents = submission
            .documents
            .into_iter()
            .map(|doc| doc.content)
            .collect();
        Self { metadata, contents }
    }

    pub fn accession(&self) -> &Accession {
        &self.metadata.accession
    }

    /// Sum of document sizes
    pub fn content_bytes(&self) -> u64 {
        self.contents.iter().map(|c| c.len() as u64).sum()
    }
}
