//! Persistence targets for decoded submissions

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::errors::ItemError;
use crate::archive::{ArchiveError, ContainerWriter, PreparedSubmission};
use crate::config::ArchiveConfig;
use crate::observability::MetricsRegistry;
use crate::storage::{LooseStore, StoredSubmission};

/// Where processing workers hand finished submissions. Called from several
/// worker threads at once.
pub trait SubmissionSink: Send + Sync {
    /// Persist one submission; returns where it landed
    fn persist(&self, submission: StoredSubmission) -> Result<PathBuf, ItemError>;

    /// Called once after the queue is drained
    fn finish(&self) -> Result<Vec<PathBuf>, ItemError>;
}

/// One directory per submission
pub struct LooseSink {
    store: LooseStore,
    metrics: Arc<MetricsRegistry>,
}

impl LooseSink {
    pub fn new(store: LooseStore, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }
}

impl SubmissionSink for LooseSink {
    fn persist(&self, submission: StoredSubmission) -> Result<PathBuf, ItemError> {
        let documents = submission.contents.len() as u64;
        let path = self.store.save(&submission)?;
        self.metrics.add_documents(documents);
        Ok(path)
    }

    fn finish(&self) -> Result<Vec<PathBuf>, ItemError> {
        Ok(Vec::new())
    }
}

/// Shared batch archive writer. Compression happens in the calling worker;
/// only the append is serialized.
pub struct ArchiveSink {
    config: ArchiveConfig,
    writer: Mutex<Option<ContainerWriter>>,
}

impl ArchiveSink {
    pub fn open(dir: &Path, config: ArchiveConfig, metrics: Arc<MetricsRegistry>) -> Result<Self, ArchiveError> {
        let writer = ContainerWriter::open(dir, config.clone())?
            .with_loose_cleanup(LooseStore::new(dir))
            .with_metrics(metrics);
        Ok(Self {
            config,
            writer: Mutex::new(Some(writer)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<ContainerWriter>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SubmissionSink for ArchiveSink {
    fn persist(&self, submission: StoredSubmission) -> Result<PathBuf, ItemError> {
        let prepared = PreparedSubmission::new(submission, &self.config)?;

        let mut guard = self.lock();
        let writer = guard.as_mut().ok_or_else(|| ItemError::Storage {
            message: "Archive writer already finished".to_string(),
            fatal: true,
        })?;
        Ok(writer.append_prepared(prepared)?)
    }

    fn finish(&self) -> Result<Vec<PathBuf>, ItemError> {
        match self.lock().take() {
            Some(writer) => Ok(writer.finish()?),
            None => Ok(Vec::new()),
        }
    }
}
