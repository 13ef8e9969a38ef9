//! Batch archive reader
//!
//! Random access goes through the offsets in metadata.json. Extraction
//! walks every archive in order and rebuilds loose directories.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tar::Archive;

use super::errors::{ArchiveError, ArchiveResult};
use super::list_archives;
use super::marker::sync_dir;
use crate::accession::Accession;
use crate::codec::Compression;
use crate::observability::{log_event_with_fields, Event};
use crate::sgml::submission::sanitize_filename;
use crate::sgml::{SubmissionMetadata, METADATA_FILE};

/// Counts from [`ContainerReader::extract_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub archives: usize,
    pub submissions: usize,
    pub documents: usize,
    pub archives_removed: usize,
}

pub struct ContainerReader {
    dir: PathBuf,
}

impl ContainerReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive files in batch/sequence order
    pub fn archives(&self) -> ArchiveResult<Vec<PathBuf>> {
        Ok(list_archives(&self.dir)?
            .into_iter()
            .map(|(_, _, path)| path)
            .collect())
    }

    /// Every accession with a metadata entry in any archive, sorted
    pub fn accessions(&self) -> ArchiveResult<Vec<Accession>> {
        let mut found = BTreeSet::new();
        for archive in self.archives()? {
            let mut tar = open_tar(&archive)?;
            let entries = tar
                .entries()
                .map_err(|e| ArchiveError::io_error_at_path(&archive, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| ArchiveError::io_error_at_path(&archive, e))?;
                let path = entry
                    .path()
                    .map_err(|e| ArchiveError::io_error_at_path(&archive, e))?;
                let (accession, name) = split_member(&path)?;
                if name == METADATA_FILE {
                    found.insert(accession);
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    /// metadata.json of one submission, offsets included
    pub fn read_metadata(&self, archive: &Path, accession: &Accession) -> ArchiveResult<SubmissionMetadata> {
        let mut tar = open_tar(archive)?;
        let entries = tar
            .entries()
            .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
            let path = entry
                .path()
                .map_err(|e| ArchiveError::io_error_at_path(archive, e))?
                .into_owned();
            let (member_accession, name) = split_member(&path)?;
            if &member_accession == accession && name == METADATA_FILE {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
                return parse_metadata(&bytes, &path);
            }
        }

        Err(ArchiveError::layout(format!(
            "{} not found in {}",
            accession,
            archive.display()
        )))
    }

    /// One document's original bytes, read by seeking to its offsets.
    /// `filename` may be the stored member name or the restored name.
    pub fn read_document(&self, archive: &Path, accession: &Accession, filename: &str) -> ArchiveResult<Vec<u8>> {
        let metadata = self.read_metadata(archive, accession)?;
        let doc = metadata
            .documents
            .iter()
            .find(|doc| {
                let stored = doc.output_filename();
                let restored = doc.compression.unwrap_or_default().strip_suffix(&stored).to_string();
                stored == filename || restored == filename
            })
            .ok_or_else(|| {
                ArchiveError::layout(format!("{} has no document {}", accession, filename))
            })?;

        let (Some(start), Some(end)) = (doc.start_byte, doc.end_byte) else {
            return Err(ArchiveError::metadata(format!(
                "{}/{} has no byte offsets",
                accession, filename
            )));
        };
        if end < start {
            return Err(ArchiveError::metadata(format!(
                "{}/{} ends before it starts",
                accession, filename
            )));
        }

        let mut file = File::open(archive).map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;

        let mut out = Vec::with_capacity(doc.size_bytes as usize);
        doc.compression
            .unwrap_or_default()
            .decompress_to(file.take(end - start), &mut out)
            .map_err(|e| ArchiveError::codec(format!("Failed to decompress {}/{}", accession, filename), e))?;
        Ok(out)
    }

    /// Rebuild loose directories under `output_dir` from every archive.
    ///
    /// Existing files are replaced. Archives are removed only when
    /// `remove_archives` is set and every archive extracted cleanly.
    pub fn extract_all(&self, output_dir: &Path, remove_archives: bool) -> ArchiveResult<ExtractSummary> {
        let archives = self.archives()?;
        log_event_with_fields(
            Event::ExtractStart,
            &[("archives", &archives.len().to_string())],
        );

        fs::create_dir_all(output_dir).map_err(|e| ArchiveError::io_error_at_path(output_dir, e))?;

        let mut summary = ExtractSummary::default();
        for archive in &archives {
            extract_archive(archive, output_dir, &mut summary)?;
            summary.archives += 1;
        }

        if remove_archives {
            for archive in &archives {
                fs::remove_file(archive).map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
                summary.archives_removed += 1;
            }
            sync_dir(&self.dir)?;
        }

        log_event_with_fields(
            Event::ExtractComplete,
            &[
                ("archives", &summary.archives.to_string()),
                ("submissions", &summary.submissions.to_string()),
                ("documents", &summary.documents.to_string()),
                ("removed", &summary.archives_removed.to_string()),
            ],
        );
        Ok(summary)
    }
}

fn open_tar(path: &Path) -> ArchiveResult<Archive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| ArchiveError::io_error_at_path(path, e))?;
    Ok(Archive::new(BufReader::new(file)))
}

fn parse_metadata(bytes: &[u8], path: &Path) -> ArchiveResult<SubmissionMetadata> {
    SubmissionMetadata::from_json(bytes)
        .map_err(|e| ArchiveError::metadata(format!("Unreadable {}: {}", path.display(), e)))
}

/// Split `{accession}/{name}`, rejecting anything that could escape the
/// accession's directory
fn split_member(path: &Path) -> ArchiveResult<(Accession, String)> {
    let malformed = || ArchiveError::layout(format!("Malformed member path {}", path.display()));

    let text = path.to_str().ok_or_else(malformed)?;
    let (dir, name) = text.split_once('/').ok_or_else(malformed)?;
    let accession = Accession::parse(dir).map_err(|_| malformed())?;
    if accession.no_dash() != dir || sanitize_filename(name).as_deref() != Some(name) {
        return Err(malformed());
    }
    Ok((accession, name.to_string()))
}

fn extract_archive(archive: &Path, output_dir: &Path, summary: &mut ExtractSummary) -> ArchiveResult<()> {
    let mut tar = open_tar(archive)?;
    let entries = tar
        .entries()
        .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;

    // Member name -> codec, from the metadata entry preceding the members
    let mut codecs: HashMap<String, Compression> = HashMap::new();
    let mut current: Option<Accession> = None;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| ArchiveError::io_error_at_path(archive, e))?
            .into_owned();
        let (accession, name) = split_member(&path)?;

        let dir = output_dir.join(accession.no_dash());
        fs::create_dir_all(&dir).map_err(|e| ArchiveError::io_error_at_path(&dir, e))?;

        if name == METADATA_FILE {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ArchiveError::io_error_at_path(archive, e))?;
            let mut metadata = parse_metadata(&bytes, &path)?;

            codecs = metadata
                .documents
                .iter()
                .map(|doc| (doc.output_filename(), doc.compression.unwrap_or_default()))
                .collect();
            current = Some(accession);

            metadata.strip_archive_fields();
            let json = metadata
                .to_json()
                .map_err(|e| ArchiveError::metadata(format!("Failed to serialize {}: {}", path.display(), e)))?;
            replace_file(&dir, METADATA_FILE, |out| out.write_all(&json))
                .map_err(|e| ArchiveError::io_error_at_path(&dir.join(METADATA_FILE), e))?;
            summary.submissions += 1;
            continue;
        }

        if current.as_ref() != Some(&accession) {
            return Err(ArchiveError::layout(format!(
                "{} precedes its metadata in {}",
                path.display(),
                archive.display()
            )));
        }
        let compression = codecs.get(&name).copied().ok_or_else(|| {
            ArchiveError::layout(format!("{} is not described by its metadata", path.display()))
        })?;
        let restored = compression.strip_suffix(&name).to_string();

        replace_file(&dir, &restored, |out| {
            compression.decompress_to(&mut entry, out).map(|_| ())
        })
        .map_err(|e| ArchiveError::codec(format!("Failed to extract {}", path.display()), e))?;
        summary.documents += 1;
    }

    Ok(())
}

/// Write `dir/name` through a temp file so a failed write never leaves a
/// truncated file in place
fn replace_file<F>(dir: &Path, name: &str, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let tmp = dir.join(format!(".{}.extract", name));
    let target = dir.join(name);

    let result = (|| {
        let mut out = BufWriter::new(File::create(&tmp)?);
        write(&mut out)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        fs::rename(&tmp, &target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
