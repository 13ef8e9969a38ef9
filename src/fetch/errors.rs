//! # Fetch Errors

use thiserror::Error;

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors from downloading one submission
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Still rate limited after retry: {url}")]
    RateLimited { url: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RateLimited { .. } => Some(429),
            FetchError::Http(e) => e.status().map(|s| s.as_u16()),
            FetchError::Transport(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        let err = FetchError::Status {
            status: 404,
            url: "https://example.test/x.sgml".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404 for https://example.test/x.sgml");
        assert_eq!(
            FetchError::RateLimited { url: "u".into() }.status(),
            Some(429)
        );
        assert_eq!(FetchError::Transport("reset".into()).status(), None);
    }
}
