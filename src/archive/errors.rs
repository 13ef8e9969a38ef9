//! Archive error types
//!
//! Archive errors follow the code + severity model:
//! - Structured codes in SGMLVAULT_ARCHIVE_NAME format
//! - I/O and recovery failures are FATAL: the run stops taking new work
//! - Codec, metadata and layout failures are ERROR: one submission is lost
//!
//! Each tar member is self-contained, so an archive cut short by a fatal
//! error is still readable up to its last committed submission.

use std::fmt;
use std::io;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The affected submission failed; the writer is still usable
    Error,
    /// The writer cannot continue
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Archive error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveErrorCode {
    /// Disk or permission failure while reading or writing an archive
    Io,
    /// Compression or decompression failure
    Codec,
    /// metadata.json could not be produced or parsed
    Metadata,
    /// Offsets could not be computed, or an archive member is malformed
    Layout,
    /// An interrupted run could not be recovered
    Recovery,
}

impl ArchiveErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveErrorCode::Io => "SGMLVAULT_ARCHIVE_IO",
            ArchiveErrorCode::Codec => "SGMLVAULT_ARCHIVE_CODEC",
            ArchiveErrorCode::Metadata => "SGMLVAULT_ARCHIVE_METADATA",
            ArchiveErrorCode::Layout => "SGMLVAULT_ARCHIVE_LAYOUT",
            ArchiveErrorCode::Recovery => "SGMLVAULT_ARCHIVE_RECOVERY",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ArchiveErrorCode::Io | ArchiveErrorCode::Recovery => Severity::Fatal,
            ArchiveErrorCode::Codec | ArchiveErrorCode::Metadata | ArchiveErrorCode::Layout => {
                Severity::Error
            }
        }
    }
}

impl fmt::Display for ArchiveErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Archive error with full context
#[derive(Debug)]
pub struct ArchiveError {
    code: ArchiveErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl ArchiveError {
    fn new(code: ArchiveErrorCode, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(ArchiveErrorCode::Io, message, Some(source))
    }

    pub fn io_error_at_path(path: &std::path::Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn codec(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(ArchiveErrorCode::Codec, message, Some(source))
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::new(ArchiveErrorCode::Metadata, message, None)
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::new(ArchiveErrorCode::Layout, message, None)
    }

    pub fn recovery(message: impl Into<String>) -> Self {
        Self::new(ArchiveErrorCode::Recovery, message, None)
    }

    pub fn code(&self) -> ArchiveErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<crate::storage::StorageError> for ArchiveError {
    fn from(err: crate::storage::StorageError) -> Self {
        ArchiveError::io_error(
            "Loose storage failure",
            io::Error::new(io::ErrorKind::Other, err.to_string()),
        )
    }
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
