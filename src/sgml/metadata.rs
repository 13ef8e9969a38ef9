//! `metadata.json`
//!
//! ```json
//! {
//!   "accession-number": "000095012309012345",
//!   "filing-date": "2009-03-01",
//!   "documents": [{"sequence": "1", "filename": "form10k.htm", "type": "10-K", "size_bytes": 1234}],
//!   "type": "10-K",
//!   "filer": {"company-data": {"conformed-name": "ACME CORP"}}
//! }
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::submission::{standardize_key, DocumentDescriptor, Submission};
use crate::accession::Accession;

pub const METADATA_FILE: &str = "metadata.json";

/// Keys owned by the typed fields; never repeated in the flattened header
const RESERVED_KEYS: [&str; 3] = ["accession-number", "filing-date", "documents"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    #[serde(rename = "accession-number")]
    pub accession: Accession,
    #[serde(rename = "filing-date", default, skip_serializing_if = "Option::is_none")]
    pub filing_date: Option<NaiveDate>,
    pub documents: Vec<DocumentDescriptor>,
    /// Standardized header fields
    #[serde(flatten)]
    pub header: serde_json::Map<String, serde_json::Value>,
}

impl SubmissionMetadata {
    pub fn from_submission(submission: &Submission) -> Self {
        let mut header = submission.header.to_json_with(&standardize_key);
        for key in RESERVED_KEYS {
            header.remove(key);
        }
        Self {
            accession: submission.accession.clone(),
            filing_date: submission.filing_date,
            documents: submission
                .documents
                .iter()
                .map(|d| d.descriptor.clone())
                .collect(),
            header,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Drop archive bookkeeping so the metadata describes loose files
    pub fn strip_archive_fields(&mut self) {
        for doc in &mut self.documents {
            doc.start_byte = None;
            doc.end_byte = None;
            if let (Some(name), Some(compression)) = (doc.filename.as_deref(), doc.compression) {
                let restored = compression.strip_suffix(name).to_string();
                doc.filename = Some(restored);
            }
            doc.compression = None;
        }
    }
}
