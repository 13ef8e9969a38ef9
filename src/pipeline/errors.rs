//! # Pipeline Errors
//!
//! `ItemError` is confined to one accession and never escapes the run;
//! `PipelineError` is what `run()` returns.

use std::fmt;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::sgml::DecodeError;
use crate::storage::StorageError;

/// Pipeline stage an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Decompress,
    Decode,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Decompress => "decompress",
            Stage::Decode => "decode",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single accession
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Network error: {0}")]
    Network(#[from] FetchError),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {message}")]
    Storage { message: String, fatal: bool },
}

impl ItemError {
    pub fn stage(&self) -> Stage {
        match self {
            ItemError::Network(_) => Stage::Fetch,
            ItemError::Decompression(_) => Stage::Decompress,
            ItemError::Decode(_) => Stage::Decode,
            ItemError::Storage { .. } => Stage::Persist,
        }
    }

    /// Disk-level failures stop the run; everything else skips one item
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Storage { fatal: true, .. })
    }
}

impl From<ArchiveError> for ItemError {
    fn from(err: ArchiveError) -> Self {
        ItemError::Storage {
            fatal: err.is_fatal(),
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for ItemError {
    fn from(err: StorageError) -> Self {
        ItemError::Storage {
            fatal: matches!(err, StorageError::IoError(_)),
            message: err.to_string(),
        }
    }
}

/// Errors returned from a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] FetchError),

    #[error("Storage setup failed: {0}")]
    Setup(String),

    #[error("Run aborted at {accession}: {reason}")]
    Fatal { accession: String, reason: String },

    #[error("Worker failure: {0}")]
    Worker(String),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::Setup(err.to_string())
    }
}

impl From<ArchiveError> for PipelineError {
    fn from(err: ArchiveError) -> Self {
        PipelineError::Setup(err.to_string())
    }
}
