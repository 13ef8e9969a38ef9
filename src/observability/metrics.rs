//! Run counters
//!
//! - Counters only, monotonic
//! - Thread-safe, shared between the async fetch tasks and worker threads

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters for one pipeline run.
///
/// Relaxed ordering is enough: counters are only read for the end-of-run
/// summary, after every worker has been joined.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// HTTP requests issued, retries included
    requests_issued: AtomicU64,
    /// Rate-limit responses that triggered a retry
    rate_limit_retries: AtomicU64,
    /// Raw bytes received from the network
    bytes_fetched: AtomicU64,
    /// Submissions downloaded with a success status
    submissions_fetched: AtomicU64,
    /// Submissions decoded
    submissions_decoded: AtomicU64,
    /// Submissions written to loose directories or archives
    submissions_persisted: AtomicU64,
    /// Submissions that failed at any stage
    submissions_failed: AtomicU64,
    /// Documents written
    documents_written: AtomicU64,
    /// Archives sealed
    archives_closed: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limit_retries(&self) {
        self.rate_limit_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_fetched(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_fetched(&self) {
        self.submissions_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_decoded(&self) {
        self.submissions_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persisted(&self) {
        self.submissions_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.submissions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_documents(&self, count: u64) {
        self.documents_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_archives_closed(&self) {
        self.archives_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            rate_limit_retries: self.rate_limit_retries.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            submissions_fetched: self.submissions_fetched.load(Ordering::Relaxed),
            submissions_decoded: self.submissions_decoded.load(Ordering::Relaxed),
            submissions_persisted: self.submissions_persisted.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            archives_closed: self.archives_closed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_issued: u64,
    pub rate_limit_retries: u64,
    pub bytes_fetched: u64,
    pub submissions_fetched: u64,
    pub submissions_decoded: u64,
    pub submissions_persisted: u64,
    pub submissions_failed: u64,
    pub documents_written: u64,
    pub archives_closed: u64,
}

/// End-of-run summary shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Identifiers handed to the run
    pub requested: u64,
    /// Identifiers fully persisted
    pub succeeded: u64,
    /// Identifiers recorded in the error ledger
    pub failed: u64,
    /// Wall-clock duration in seconds
    pub elapsed_secs: f64,
    /// Raw counters
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    pub fn new(requested: u64, elapsed: Duration, metrics: MetricsSnapshot) -> Self {
        Self {
            requested,
            succeeded: metrics.submissions_persisted,
            failed: metrics.submissions_failed,
            elapsed_secs: elapsed.as_secs_f64(),
            metrics,
        }
    }

    /// Submissions persisted per second
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.succeeded as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} succeeded, {} failed in {:.2}s ({:.2} submissions/s)",
            self.requested,
            self.succeeded,
            self.failed,
            self.elapsed_secs,
            self.throughput()
        )
    }
}
