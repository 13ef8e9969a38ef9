//! Observable events
//!
//! Every event the ingestion core logs is named here, so log consumers can
//! rely on a closed vocabulary.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Run lifecycle
    /// Pipeline run begins
    RunStart,
    /// Pipeline run complete
    RunComplete,
    /// Pipeline aborted by a fatal storage error
    RunAborted,

    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Fetch
    /// Download started for one identifier
    FetchStart,
    /// Download finished with a success status
    FetchComplete,
    /// Download failed (transport error or non-success status)
    FetchFailed,
    /// Rate-limit response received, retrying after cooldown
    FetchRateLimited,

    // Processing
    /// Compressed payload could not be decompressed
    DecompressionFailed,
    /// Container could not be decoded
    DecodeFailed,
    /// Submission written to loose directory or archive
    SubmissionPersisted,
    /// Submission could not be written
    PersistFailed,

    // Error ledger
    /// Error ledger could not be written
    LedgerWriteFailed,

    // Archive writer
    /// New batch archive opened
    ArchiveOpened,
    /// Batch archive sealed
    ArchiveClosed,
    /// Interrupted archive run recovered from its marker
    ArchiveRecovered,
    /// Archive write failed (FATAL)
    ArchiveWriteFailed,

    // Archive reader
    /// Extraction of all archives begins
    ExtractStart,
    /// Extraction complete, archives removed
    ExtractComplete,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RunStart => "RUN_BEGIN",
            Event::RunComplete => "RUN_COMPLETE",
            Event::RunAborted => "RUN_ABORTED",

            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::FetchStart => "FETCH_BEGIN",
            Event::FetchComplete => "FETCH_COMPLETE",
            Event::FetchFailed => "FETCH_FAILED",
            Event::FetchRateLimited => "FETCH_RATE_LIMITED",

            Event::DecompressionFailed => "DECOMPRESSION_FAILED",
            Event::DecodeFailed => "DECODE_FAILED",
            Event::SubmissionPersisted => "SUBMISSION_PERSISTED",
            Event::PersistFailed => "PERSIST_FAILED",

            Event::LedgerWriteFailed => "LEDGER_WRITE_FAILED",

            Event::ArchiveOpened => "ARCHIVE_OPENED",
            Event::ArchiveClosed => "ARCHIVE_CLOSED",
            Event::ArchiveRecovered => "ARCHIVE_RECOVERED",
            Event::ArchiveWriteFailed => "ARCHIVE_WRITE_FAILED",

            Event::ExtractStart => "EXTRACT_BEGIN",
            Event::ExtractComplete => "EXTRACT_COMPLETE",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::ArchiveWriteFailed | Event::RunAborted)
    }

    /// Returns true if this event reports a single failed item
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Event::FetchFailed
                | Event::DecompressionFailed
                | Event::DecodeFailed
                | Event::PersistFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
