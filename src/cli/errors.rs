//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero status.

use std::fmt;
use std::io;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file missing, unreadable or invalid
    ConfigError,
    /// I/O error
    IoError,
    /// Malformed command input (ids file, accession)
    InvalidInput,
    /// Container could not be decoded
    DecodeFailed,
    /// Pipeline run aborted
    RunFailed,
    /// Archive packing or extraction failed
    ArchiveFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "SGMLVAULT_CLI_CONFIG_ERROR",
            Self::IoError => "SGMLVAULT_CLI_IO_ERROR",
            Self::InvalidInput => "SGMLVAULT_CLI_INVALID_INPUT",
            Self::DecodeFailed => "SGMLVAULT_CLI_DECODE_FAILED",
            Self::RunFailed => "SGMLVAULT_CLI_RUN_FAILED",
            Self::ArchiveFailed => "SGMLVAULT_CLI_ARCHIVE_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidInput, msg)
    }

    pub fn decode_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::DecodeFailed, msg)
    }

    pub fn run_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RunFailed, msg)
    }

    pub fn archive_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ArchiveFailed, msg)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<crate::config::ConfigError> for CliError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<crate::archive::ArchiveError> for CliError {
    fn from(e: crate::archive::ArchiveError) -> Self {
        Self::archive_failed(e.to_string())
    }
}

impl From<crate::storage::StorageError> for CliError {
    fn from(e: crate::storage::StorageError) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<crate::pipeline::PipelineError> for CliError {
    fn from(e: crate::pipeline::PipelineError) -> Self {
        Self::run_failed(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::invalid_input("line 3: bad accession");
        assert_eq!(err.code_str(), "SGMLVAULT_CLI_INVALID_INPUT");
        assert_eq!(err.to_string(), "SGMLVAULT_CLI_INVALID_INPUT: line 3: bad accession");
    }

    #[test]
    fn test_config_error_conversion() {
        let err = CliError::from(crate::config::ConfigError::Parse("eof".into()));
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
