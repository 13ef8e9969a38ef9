//! Decode errors
//!
//! Any decode error discards the whole submission: partially decoded
//! metadata is never persisted.

use thiserror::Error;

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty container")]
    Empty,

    #[error("No usable accession number: {0}")]
    MissingAccession(String),

    #[error("Document {index} has neither a filename nor a sequence number")]
    MissingIdentity { index: usize },

    #[error("Unterminated {what} at end of stream")]
    Unterminated { what: String },

    #[error("Line {line}: <{tag}> outside of a <DOCUMENT>")]
    MisplacedTag { line: usize, tag: String },

    #[error("Invalid uuencoded content at line {line}: {reason}")]
    InvalidUuencode { line: usize, reason: String },
}

impl DecodeError {
    /// True for errors that lenient mode would have tolerated
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DecodeError::Unterminated { .. } | DecodeError::MisplacedTag { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DecodeError::MissingIdentity { index: 2 };
        assert!(err.to_string().contains("neither a filename nor a sequence"));

        let err = DecodeError::Unterminated { what: "<TEXT>".into() };
        assert_eq!(err.to_string(), "Unterminated <TEXT> at end of stream");
    }

    #[test]
    fn test_structural_classification() {
        assert!(DecodeError::Unterminated { what: "x".into() }.is_structural());
        assert!(!DecodeError::MissingIdentity { index: 0 }.is_structural());
        assert!(!DecodeError::Empty.is_structural());
    }
}
