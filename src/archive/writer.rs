//! Batch archive writer
//!
//! Per submission, in order:
//! 1. metadata.json, carrying the offsets of every document that follows
//! 2. each document, compressed and suffixed when above the threshold
//! 3. flush + fsync, then the in-progress marker records the commit
//! 4. the submission's loose directory, if any, is deleted
//!
//! An archive is sealed (trailer, fsync, marker removed) when the next
//! submission would push it past `max_batch_size`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tar::{Builder, EntryType, Header};

use super::errors::{ArchiveError, ArchiveResult};
use super::layout::{assign_offsets, Member, TRAILER};
use super::marker::{recover, sync_dir, ArchiveMarker};
use super::{archive_name, list_archives};
use crate::accession::Accession;
use crate::codec::Compression;
use crate::config::ArchiveConfig;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::sgml::{SubmissionMetadata, METADATA_FILE};
use crate::storage::{LooseStore, StoredSubmission};

/// A submission with its documents already compressed, ready to append.
///
/// Building one is CPU-bound and needs no writer state, so callers sharing
/// a writer prepare outside its lock.
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    metadata: SubmissionMetadata,
    members: Vec<Member>,
}

impl PreparedSubmission {
    pub fn new(stored: StoredSubmission, config: &ArchiveConfig) -> ArchiveResult<Self> {
        let StoredSubmission {
            mut metadata,
            contents,
        } = stored;
        let prefix = metadata.accession.no_dash().to_string();
        let level = config.level();

        let mut members = Vec::with_capacity(contents.len());
        for (doc, content) in metadata.documents.iter_mut().zip(contents) {
            let name = doc.output_filename();
            doc.start_byte = None;
            doc.end_byte = None;
            doc.compression = None;

            let compress = config.compression != Compression::None
                && content.len() as u64 >= config.compression_threshold;
            let (member_name, data) = if compress {
                let data = config.compression.compress(&content, level).map_err(|e| {
                    ArchiveError::codec(format!("Failed to compress {}/{}", prefix, name), e)
                })?;
                let member_name = format!("{}{}", name, config.compression.suffix());
                doc.filename = Some(member_name.clone());
                doc.compression = Some(config.compression);
                (member_name, data)
            } else {
                (name, content)
            };

            members.push(Member {
                path: format!("{}/{}", prefix, member_name),
                data,
            });
        }

        if members.len() != metadata.documents.len() {
            return Err(ArchiveError::layout(format!(
                "{} has {} documents but {} contents",
                prefix,
                metadata.documents.len(),
                members.len()
            )));
        }

        Ok(Self { metadata, members })
    }

    pub fn accession(&self) -> &Accession {
        &self.metadata.accession
    }
}

/// Counts bytes so archive positions are known without seeking
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenArchive {
    path: PathBuf,
    builder: Builder<CountingWriter<BufWriter<File>>>,
    marker: ArchiveMarker,
}

impl OpenArchive {
    fn position(&self) -> u64 {
        self.builder.get_ref().written
    }
}

/// Appends submissions to size-bounded `batch_BBB_SSS.tar` archives
pub struct ContainerWriter {
    dir: PathBuf,
    config: ArchiveConfig,
    batch: u32,
    sequence: u32,
    current: Option<OpenArchive>,
    loose: Option<LooseStore>,
    metrics: Option<Arc<MetricsRegistry>>,
    sealed: Vec<PathBuf>,
}

impl ContainerWriter {
    /// Open a writer on `dir`, first recovering any interrupted run.
    /// The batch number is one past the highest already present.
    pub fn open(dir: &Path, config: ArchiveConfig) -> ArchiveResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| ArchiveError::io_error_at_path(dir, e))?;
        recover(dir, &LooseStore::new(dir))?;

        let batch = list_archives(dir)?
            .iter()
            .map(|(batch, _, _)| *batch)
            .max()
            .map_or(1, |max| max + 1);

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            batch,
            sequence: 1,
            current: None,
            loose: None,
            metrics: None,
            sealed: Vec::new(),
        })
    }

    /// Delete each submission's loose directory once it is durable here
    pub fn with_loose_cleanup(mut self, loose: LooseStore) -> Self {
        self.loose = Some(loose);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn batch(&self) -> u32 {
        self.batch
    }

    /// Sequence number the next archive opened will carry
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Compress and append; returns the archive holding the submission
    pub fn append(&mut self, stored: StoredSubmission) -> ArchiveResult<PathBuf> {
        let prepared = PreparedSubmission::new(stored, &self.config)?;
        self.append_prepared(prepared)
    }

    pub fn append_prepared(&mut self, prepared: PreparedSubmission) -> ArchiveResult<PathBuf> {
        let PreparedSubmission {
            mut metadata,
            members,
        } = prepared;
        let accession = metadata.accession.clone();
        let metadata_path = format!("{}/{}", accession.no_dash(), METADATA_FILE);

        if let Some(current) = &self.current {
            let (_, end) = assign_offsets(current.position(), &metadata_path, &mut metadata, &members)?;
            let has_content = !current.marker.committed.is_empty();
            if has_content && end + TRAILER > self.config.max_batch_size {
                self.close_current()?;
            }
        }
        if self.current.is_none() {
            self.open_next()?;
        }
        let Some(current) = self.current.as_mut() else {
            return Err(ArchiveError::layout("No open archive after rollover"));
        };

        let start = current.position();
        let (json, end) = assign_offsets(start, &metadata_path, &mut metadata, &members)?;
        let mtime = chrono::Utc::now().timestamp().max(0) as u64;

        append_member(&mut current.builder, &metadata_path, &json, mtime)
            .map_err(|e| ArchiveError::io_error(format!("Failed to append {}", metadata_path), e))?;
        for member in &members {
            append_member(&mut current.builder, &member.path, &member.data, mtime)
                .map_err(|e| ArchiveError::io_error(format!("Failed to append {}", member.path), e))?;
        }

        if current.position() != end {
            return Err(ArchiveError::io_error(
                format!("Archive position drifted for {}", accession),
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("expected {} bytes, wrote {}", end, current.position()),
                ),
            ));
        }

        current
            .builder
            .get_mut()
            .flush()
            .and_then(|_| current.builder.get_ref().inner.get_ref().sync_data())
            .map_err(|e| ArchiveError::io_error_at_path(&current.path, e))?;

        current.marker.committed.push(accession.clone());
        current.marker.committed_len = end;
        current.marker.write(&self.dir)?;
        let path = current.path.clone();

        if let Some(loose) = &self.loose {
            loose.remove(&accession)?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.add_documents(members.len() as u64);
        }

        Ok(path)
    }

    /// Seal the open archive, if any, and return every archive sealed
    pub fn finish(mut self) -> ArchiveResult<Vec<PathBuf>> {
        if self.current.is_some() {
            self.close_current()?;
        }
        Ok(std::mem::take(&mut self.sealed))
    }

    fn open_next(&mut self) -> ArchiveResult<()> {
        let name = archive_name(self.batch, self.sequence);
        let path = self.dir.join(&name);

        // Marker first: a crash before the file exists recovers to nothing.
        let marker = ArchiveMarker::new(&name);
        marker.write(&self.dir)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ArchiveError::io_error_at_path(&path, e))?;

        let builder = Builder::new(CountingWriter {
            inner: BufWriter::new(file),
            written: 0,
        });

        log_event_with_fields(Event::ArchiveOpened, &[("archive", name.as_str())]);

        self.current = Some(OpenArchive {
            path,
            builder,
            marker,
        });
        Ok(())
    }

    fn close_current(&mut self) -> ArchiveResult<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        let submissions = current.marker.committed.len();

        let counting = current
            .builder
            .into_inner()
            .map_err(|e| ArchiveError::io_error_at_path(&current.path, e))?;
        let size = counting.written;
        let file = counting
            .inner
            .into_inner()
            .map_err(|e| ArchiveError::io_error_at_path(&current.path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| ArchiveError::io_error_at_path(&current.path, e))?;
        sync_dir(&self.dir)?;
        ArchiveMarker::remove(&self.dir)?;

        self.sequence += 1;
        if let Some(metrics) = &self.metrics {
            metrics.increment_archives_closed();
        }
        log_event_with_fields(
            Event::ArchiveClosed,
            &[
                ("archive", current.marker.archive.as_str()),
                ("bytes", &size.to_string()),
                ("submissions", &submissions.to_string()),
            ],
        );

        self.sealed.push(current.path);
        Ok(())
    }
}

fn append_member<W: Write>(
    builder: &mut Builder<W>,
    path: &str,
    data: &[u8],
    mtime: u64,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_entry_type(EntryType::Regular);
    builder.append_data(&mut header, path, data)
}
