//! Archive-in-progress marker
//!
//! While a batch archive is open, `archive_in_progress.json` records:
//! - archive: file name of the open archive
//! - committed_len: archive length after the last durable submission
//! - committed: accessions durably written so far
//!
//! The marker is rewritten after every committed submission and removed once
//! the archive is sealed. Finding one at startup means the previous run
//! stopped mid-archive.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{ArchiveError, ArchiveResult};
use super::layout::TRAILER;
use crate::accession::Accession;
use crate::observability::{log_event_with_fields, Event};
use crate::storage::LooseStore;

pub const MARKER_FILE: &str = "archive_in_progress.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveMarker {
    pub archive: String,
    pub committed_len: u64,
    pub committed: Vec<Accession>,
    pub format_version: u8,
}

/// What recovery did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sealed archive, or None if it held no committed submission and was removed
    pub archive: Option<PathBuf>,
    pub committed: usize,
}

impl ArchiveMarker {
    pub fn new(archive: &str) -> Self {
        Self {
            archive: archive.to_string(),
            committed_len: 0,
            committed: Vec::new(),
            format_version: 1,
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MARKER_FILE)
    }

    /// Write via a temp file and rename, with fsync
    pub fn write(&self, dir: &Path) -> ArchiveResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ArchiveError::metadata(format!("Failed to serialize marker: {}", e)))?;

        let path = Self::path(dir);
        let tmp = dir.join(format!("{}.tmp", MARKER_FILE));

        let mut file = File::create(&tmp).map_err(|e| ArchiveError::io_error_at_path(&tmp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| ArchiveError::io_error_at_path(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| ArchiveError::io_error_at_path(&path, e))?;

        sync_dir(dir)
    }

    pub fn read(dir: &Path) -> ArchiveResult<Option<Self>> {
        let path = Self::path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArchiveError::io_error_at_path(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ArchiveError::recovery(format!("Unreadable marker {}: {}", path.display(), e)))
    }

    pub fn remove(dir: &Path) -> ArchiveResult<()> {
        let path = Self::path(dir);
        match fs::remove_file(&path) {
            Ok(()) => sync_dir(dir),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArchiveError::io_error_at_path(&path, e)),
        }
    }
}

/// fsync a directory so renames and removals in it are durable
pub(crate) fn sync_dir(dir: &Path) -> ArchiveResult<()> {
    let handle = OpenOptions::new()
        .read(true)
        .open(dir)
        .map_err(|e| ArchiveError::io_error_at_path(dir, e))?;
    handle
        .sync_all()
        .map_err(|e| ArchiveError::io_error_at_path(dir, e))
}

/// Finish an interrupted archive run, if a marker says there was one.
///
/// The archive is cut back to its committed length and sealed with a tar
/// trailer; anything written after the last commit is discarded. Loose
/// directories of committed accessions are then deleted, completing their
/// migration.
pub fn recover(dir: &Path, loose: &LooseStore) -> ArchiveResult<Option<RecoveryReport>> {
    let Some(marker) = ArchiveMarker::read(dir)? else {
        return Ok(None);
    };

    let archive = dir.join(&marker.archive);
    if archive.file_name().map(|n| n.to_string_lossy().into_owned()) != Some(marker.archive.clone()) {
        return Err(ArchiveError::recovery(format!(
            "Marker names an archive outside {}: {}",
            dir.display(),
            marker.archive
        )));
    }

    let sealed = if marker.committed.is_empty() {
        match fs::remove_file(&archive) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ArchiveError::io_error_at_path(&archive, e)),
        }
        None
    } else {
        seal_at(&archive, marker.committed_len)?;
        Some(archive.clone())
    };

    for accession in &marker.committed {
        loose.remove(accession)?;
    }
    ArchiveMarker::remove(dir)?;

    log_event_with_fields(
        Event::ArchiveRecovered,
        &[
            ("archive", marker.archive.as_str()),
            ("committed", &marker.committed.len().to_string()),
        ],
    );

    Ok(Some(RecoveryReport {
        archive: sealed,
        committed: marker.committed.len(),
    }))
}

fn seal_at(archive: &Path, committed_len: u64) -> ArchiveResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(archive)
        .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;

    let actual = file
        .metadata()
        .map_err(|e| ArchiveError::io_error_at_path(archive, e))?
        .len();
    if actual < committed_len {
        return Err(ArchiveError::recovery(format!(
            "{} is {} bytes, shorter than its committed length {}",
            archive.display(),
            actual,
            committed_len
        )));
    }

    file.set_len(committed_len)
        .and_then(|_| file.seek(SeekFrom::Start(committed_len)))
        .and_then(|_| file.write_all(&[0u8; TRAILER as usize]))
        .and_then(|_| file.sync_all())
        .map_err(|e| ArchiveError::io_error_at_path(archive, e))
}
