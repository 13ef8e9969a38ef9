//! Ingestion configuration
//!
//! Loaded from a JSON file. Every field has a default, so `{}` is a valid
//! config that downloads into `./data` with loose-directory output.

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Compression;
use crate::ratelimit::RateLimiter;

/// Environment variable consulted when `api_key` is not set
pub const API_KEY_ENV: &str = "SGMLVAULT_API_KEY";

/// How decoded submissions are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    /// One directory per submission
    #[default]
    Loose,
    /// Batched tar archives
    Archive,
}

/// Request rate: `requests` per `window_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_requests")]
    pub requests: f64,

    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

fn default_rate_requests() -> f64 {
    10.0
}
fn default_rate_window_ms() -> u64 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_ms: default_rate_window_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn build(&self) -> ConfigResult<RateLimiter> {
        RateLimiter::new(self.requests, self.window())
            .map_err(|e| ConfigError::invalid("rate_limit", e.to_string()))
    }
}

/// Batch archive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Codec for large documents (default: zstd)
    #[serde(default = "default_compression")]
    pub compression: Compression,

    /// Codec level (default: gzip 6, zstd 3)
    #[serde(default)]
    pub compression_level: Option<i32>,

    /// Documents at least this large are compressed (default: 1 MiB)
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: u64,

    /// Upper bound on one archive file (default: 1 GiB)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u64,
}

fn default_compression() -> Compression {
    Compression::Zstd
}
fn default_compression_threshold() -> u64 {
    1024 * 1024
}
fn default_max_batch_size() -> u64 {
    1024 * 1024 * 1024
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            compression_level: None,
            compression_threshold: default_compression_threshold(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl ArchiveConfig {
    /// Effective codec level
    pub fn level(&self) -> i32 {
        self.compression_level
            .unwrap_or_else(|| self.compression.default_level())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("archive.max_batch_size", "must be > 0"));
        }
        let (low, high) = self.compression.level_range();
        let level = self.level();
        if level < low || level > high {
            return Err(ConfigError::invalid(
                "archive.compression_level",
                format!(
                    "{} is outside {}..={} for {}",
                    level, low, high, self.compression
                ),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Prefix every submission URL is built from
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Where loose directories, archives and `errors.json` live
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// In-flight download cap (default: 100)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Body read granularity in bytes (default: 2 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Decompression pool size (default: available cores)
    #[serde(default = "default_workers")]
    pub decompression_workers: usize,

    /// Decode/persist pool size (default: available cores)
    #[serde(default = "default_workers")]
    pub processing_workers: usize,

    /// Work queue depth between decompression and decoding (default: 10)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub persist: PersistMode,

    /// Close unterminated container structure instead of rejecting it
    #[serde(default)]
    pub lenient_decoding: bool,

    /// Keep only these document types (all when absent)
    #[serde(default)]
    pub keep_document_types: Option<Vec<String>>,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

fn default_base_url() -> String {
    "https://library.datamule.xyz/original/nc/".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_user_agent() -> String {
    concat!("sgmlvault/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_max_concurrent_downloads() -> usize {
    100
}
fn default_chunk_size() -> usize {
    2 * 1024 * 1024
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_queue_size() -> usize {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            output_dir: default_output_dir(),
            api_key: None,
            user_agent: default_user_agent(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            chunk_size: default_chunk_size(),
            decompression_workers: default_workers(),
            processing_workers: default_workers(),
            queue_size: default_queue_size(),
            rate_limit: RateLimitConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            persist: PersistMode::default(),
            lenient_decoding: false,
            keep_document_types: None,
            archive: ArchiveConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load, apply environment fallbacks and validate
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config = Self::from_json(&content)?;
        if config.api_key.is_none() {
            config.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        config.validate()?;

        Ok(config)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("base_url", "must not be empty"));
        }

        let counts = [
            ("max_concurrent_downloads", self.max_concurrent_downloads),
            ("chunk_size", self.chunk_size),
            ("decompression_workers", self.decompression_workers),
            ("processing_workers", self.processing_workers),
            ("queue_size", self.queue_size),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be > 0"));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("request_timeout_secs", "must be > 0"));
        }

        self.rate_limit.build()?;
        self.archive.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
