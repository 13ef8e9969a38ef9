//! # Batch Archives
//!
//! Submissions packed into size-bounded tar files named
//! `batch_{BBB}_{SSS}.tar`: one batch number per writer session, and a
//! sequence number per archive within it.
//!
//! Each submission occupies consecutive members:
//!
//! ```text
//! {accession}/metadata.json      documents carry start_byte/end_byte
//! {accession}/{filename}[.gz|.zst]
//! ...
//! ```
//!
//! Offsets are absolute byte positions in the archive file, so a single
//! document can be read with one seek and no tar parsing.

mod errors;
mod layout;
mod marker;
mod reader;
mod writer;

pub use errors::{ArchiveError, ArchiveErrorCode, ArchiveResult, Severity};
pub use layout::{assign_offsets, entry_span, header_span, padded, Member, BLOCK, TRAILER};
pub use marker::{recover, ArchiveMarker, RecoveryReport, MARKER_FILE};
pub use reader::{ContainerReader, ExtractSummary};
pub use writer::{ContainerWriter, PreparedSubmission};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::ArchiveConfig;
use crate::observability::{log_event_with_fields, Event};
use crate::storage::LooseStore;

/// File name of archive `sequence` in `batch`
pub fn archive_name(batch: u32, sequence: u32) -> String {
    format!("batch_{:03}_{:03}.tar", batch, sequence)
}

/// Inverse of [`archive_name`]
pub fn parse_archive_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_prefix("batch_")?.strip_suffix(".tar")?;
    let (batch, sequence) = stem.split_once('_')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(batch) || !all_digits(sequence) {
        return None;
    }
    Some((batch.parse().ok()?, sequence.parse().ok()?))
}

/// Archives in `dir` as (batch, sequence, path), ordered by batch then sequence
pub(crate) fn list_archives(dir: &Path) -> ArchiveResult<Vec<(u32, u32, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchiveError::io_error_at_path(dir, e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::io_error_at_path(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_archive_name);
        if let Some((batch, sequence)) = parsed {
            found.push((batch, sequence, path));
        }
    }

    found.sort();
    Ok(found)
}

/// Outcome of moving loose directories into archives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub skipped: usize,
    pub archives: Vec<PathBuf>,
}

/// Pack every loose directory under `dir` into new archives in `dir`.
///
/// Each loose directory is deleted once its submission is committed.
/// A directory that cannot be read or compressed is left in place and
/// counted as skipped; I/O failures on the archive itself stop the run.
pub fn migrate_loose(dir: &Path, config: &ArchiveConfig) -> ArchiveResult<MigrationSummary> {
    let loose = LooseStore::new(dir);
    loose.cleanup_partial()?;

    let mut writer = ContainerWriter::open(dir, config.clone())?.with_loose_cleanup(loose.clone());
    let mut summary = MigrationSummary::default();

    for accession in loose.list()? {
        let stored = match loose.load(&accession) {
            Ok(stored) => stored,
            Err(e) => {
                log_event_with_fields(
                    Event::PersistFailed,
                    &[("accession", accession.no_dash()), ("reason", &e.to_string())],
                );
                summary.skipped += 1;
                continue;
            }
        };

        match writer.append(stored) {
            Ok(_) => summary.migrated += 1,
            Err(e) if !e.is_fatal() => {
                log_event_with_fields(
                    Event::PersistFailed,
                    &[("accession", accession.no_dash()), ("reason", &e.to_string())],
                );
                summary.skipped += 1;
            }
            Err(e) => {
                log_event_with_fields(Event::ArchiveWriteFailed, &[("reason", &e.to_string())]);
                return Err(e);
            }
        }
    }

    summary.archives = writer.finish()?;
    Ok(summary)
}
