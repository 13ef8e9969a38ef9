//! Persistent error ledger
//!
//! `errors.json` maps accession to the last error message seen for it.
//! Entries accumulate across runs and are removed when the accession later
//! succeeds. Every change rewrites the file through a temp file and rename,
//! under the ledger's lock.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::accession::Accession;
use crate::storage::{StorageError, StorageResult};

pub const LEDGER_FILE: &str = "errors.json";

pub struct ErrorLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ErrorLedger {
    /// Open the ledger at `path`, loading existing entries
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Metadata(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::io(path.display(), e)),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Ledger file inside `dir`
    pub fn in_dir(dir: &Path) -> StorageResult<Self> {
        Self::open(dir.join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, accession: &Accession, message: &str) -> StorageResult<()> {
        let mut entries = self.lock();
        entries.insert(accession.no_dash().to_string(), message.to_string());
        self.persist(&entries)
    }

    /// Drop an entry; returns whether one existed
    pub fn resolve(&self, accession: &Accession) -> StorageResult<bool> {
        let mut entries = self.lock();
        if entries.remove(accession.no_dash()).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    /// Accessions with an entry, in order. Keys that no longer parse are
    /// skipped.
    pub fn failed_accessions(&self) -> Vec<Accession> {
        self.lock()
            .keys()
            .filter_map(|key| Accession::parse(key).ok())
            .collect()
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Metadata(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(tmp.display(), e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::io(tmp.display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::io(self.path.display(), e))
    }
}
