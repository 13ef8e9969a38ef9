//! # Loose Directory Store

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::StoredSubmission;
use crate::accession::Accession;
use crate::sgml::{SubmissionMetadata, METADATA_FILE};

const PARTIAL_SUFFIX: &str = ".partial";

/// Writes and reads `{root}/{accession}/` directories
#[derive(Debug, Clone)]
pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn submission_dir(&self, accession: &Accession) -> PathBuf {
        self.root.join(accession.no_dash())
    }

    fn staging_dir(&self, accession: &Accession) -> PathBuf {
        self.root
            .join(format!("{}{}", accession.no_dash(), PARTIAL_SUFFIX))
    }

    /// True if a complete loose directory exists
    pub fn contains(&self, accession: &Accession) -> bool {
        self.submission_dir(accession).join(METADATA_FILE).is_file()
    }

    /// Write a submission. The directory appears only once every file is
    /// written; an existing directory for the same accession is replaced.
    pub fn save(&self, submission: &StoredSubmission) -> StorageResult<PathBuf> {
        let accession = submission.accession();
        let staging = self.staging_dir(accession);
        let target = self.submission_dir(accession);

        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| StorageError::io(staging.display(), e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| StorageError::io(staging.display(), e))?;

        if let Err(e) = write_files(&staging, submission) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| StorageError::io(target.display(), e))?;
        }
        fs::rename(&staging, &target).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            StorageError::io(target.display(), e)
        })?;

        Ok(target)
    }

    /// Read a loose submission back
    pub fn load(&self, accession: &Accession) -> StorageResult<StoredSubmission> {
        let dir = self.submission_dir(accession);
        let metadata_path = dir.join(METADATA_FILE);
        let bytes = fs::read(&metadata_path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(accession.to_string())
            } else {
                StorageError::io(metadata_path.display(), e)
            }
        })?;
        let metadata = SubmissionMetadata::from_json(&bytes)
            .map_err(|e| StorageError::Metadata(format!("{}: {}", metadata_path.display(), e)))?;

        let mut contents = Vec::with_capacity(metadata.documents.len());
        for doc in &metadata.documents {
            let path = dir.join(doc.output_filename());
            contents.push(fs::read(&path).map_err(|e| StorageError::io(path.display(), e))?);
        }

        Ok(StoredSubmission { metadata, contents })
    }

    /// Delete a loose directory; missing directories are fine
    pub fn remove(&self, accession: &Accession) -> StorageResult<()> {
        let dir = self.submission_dir(accession);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(dir.display(), e)),
        }
    }

    /// Accessions with a complete loose directory, sorted
    pub fn list(&self) -> StorageResult<Vec<Accession>> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(StorageError::io(self.root.display(), e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(self.root.display(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            if let Ok(accession) = Accession::parse(name) {
                if self.contains(&accession) {
                    found.push(accession);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    /// Remove staging directories left by an interrupted run
    pub fn cleanup_partial(&self) -> StorageResult<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(self.root.display(), e)),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(PARTIAL_SUFFIX));
            if is_partial && path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| StorageError::io(path.display(), e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn write_files(dir: &Path, submission: &StoredSubmission) -> StorageResult<()> {
    let metadata = submission
        .metadata
        .to_json()
        .map_err(|e| StorageError::Metadata(e.to_string()))?;
    write_synced(&dir.join(METADATA_FILE), &metadata)?;

    for (doc, content) in submission.metadata.documents.iter().zip(&submission.contents) {
        write_synced(&dir.join(doc.output_filename()), content)?;
    }
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = File::create(path).map_err(|e| StorageError::io(path.display(), e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io(path.display(), e))
}
