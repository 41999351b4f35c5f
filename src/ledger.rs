use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::ConsecutiveFailureCounter;
use crate::reconcile::{LedgerEntry, LedgerKey};

pub const LEDGER_FILE_NAME: &str = "ledger.json";
pub const LOCK_FILE_NAME: &str = "sync.lock";

/// Persisted "already submitted" state, keyed by raw (title, artist, album).
pub trait LedgerStore {
    fn load_entries(&self) -> Result<Vec<LedgerEntry>>;
    fn delete_entry(&mut self, key: &LedgerKey) -> Result<()>;
    fn upsert_entry(&mut self, entry: LedgerEntry) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    entries: Vec<LedgerEntry>,
    #[serde(default)]
    health: ConsecutiveFailureCounter,
}

/// JSON file ledger. Every mutation rewrites the file through a temp file and a rename.
pub struct JsonLedgerStore {
    path: PathBuf,
    state: LedgerFile,
}

impl JsonLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed reading ledger at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed parsing ledger at {}", path.display()))?
        } else {
            LedgerFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.state.entries
    }

    pub fn failure_counter(&self) -> ConsecutiveFailureCounter {
        self.state.health
    }

    pub fn set_failure_counter(&mut self, counter: ConsecutiveFailureCounter) -> Result<()> {
        self.state.health = counter;
        self.persist()
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.state.entries.len();
        self.state.entries.clear();
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating ledger directory {}", parent.display()))?;
        }
        let serialized =
            serde_json::to_string_pretty(&self.state).context("Failed serializing ledger")?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, format!("{serialized}\n"))
            .with_context(|| format!("Failed writing ledger at {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("Failed replacing ledger at {}", self.path.display()))?;
        Ok(())
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.entries.clone())
    }

    fn delete_entry(&mut self, key: &LedgerKey) -> Result<()> {
        let original_len = self.state.entries.len();
        self.state.entries.retain(|entry| &entry.key != key);
        if self.state.entries.len() != original_len {
            debug!("Dropped ledger entry {key}");
            self.persist()?;
        }
        Ok(())
    }

    fn upsert_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        match self
            .state
            .entries
            .iter_mut()
            .find(|existing| existing.key == entry.key)
        {
            Some(existing) => *existing = entry,
            None => self.state.entries.push(entry),
        }
        self.persist()
    }
}

/// In-process ledger for callers that keep state elsewhere.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: BTreeMap<LedgerKey, LedgerEntry>,
}

impl MemoryLedger {
    pub fn with_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.key.clone(), entry))
                .collect(),
        }
    }

    pub fn get(&self, key: &LedgerKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LedgerStore for MemoryLedger {
    fn load_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.values().cloned().collect())
    }

    fn delete_entry(&mut self, key: &LedgerKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn upsert_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Another sync run holds the lock at {0}")]
    Locked(PathBuf),
    #[error("Failed creating run lock at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive marker file held for the duration of one sync run.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, LedgerError> {
        let lock_error = |source| LedgerError::Lock {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_error)?;
        }
        let mut handle = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(handle) => handle,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(LedgerError::Locked(path.to_path_buf()));
            }
            Err(err) => return Err(lock_error(err)),
        };
        writeln!(handle, "{}", std::process::id()).map_err(lock_error)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn entry(title: &str, position: usize) -> LedgerEntry {
        LedgerEntry {
            key: LedgerKey {
                title: title.to_string(),
                artist: "Artist".to_string(),
                album: "Album".to_string(),
            },
            array_position: position,
            max_array_position: position,
            first_time: false,
            last_seen_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join(LEDGER_FILE_NAME);
        let mut store = JsonLedgerStore::open(&path).unwrap();
        assert!(store.load_entries().unwrap().is_empty());

        store.upsert_entry(entry("A", 1)).unwrap();
        store.upsert_entry(entry("B", 2)).unwrap();
        store.upsert_entry(entry("A", 4)).unwrap();
        let mut counter = ConsecutiveFailureCounter::default();
        counter.record_failure(FailureKind::Network);
        store.set_failure_counter(counter).unwrap();

        let reopened = JsonLedgerStore::open(&path).unwrap();
        let entries = reopened.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].array_position, 4);
        assert_eq!(reopened.failure_counter().count, 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn json_store_deletes_and_clears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let mut store = JsonLedgerStore::open(&path).unwrap();
        store.upsert_entry(entry("A", 1)).unwrap();
        store.upsert_entry(entry("B", 2)).unwrap();
        store.delete_entry(&entry("A", 1).key).unwrap();
        assert_eq!(JsonLedgerStore::open(&path).unwrap().entries().len(), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert!(JsonLedgerStore::open(&path).unwrap().entries().is_empty());
    }

    #[test]
    fn memory_ledger_upserts_by_key() {
        let mut ledger = MemoryLedger::with_entries([entry("A", 1)]);
        ledger.upsert_entry(entry("A", 3)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&entry("A", 0).key).unwrap().array_position, 3);
        ledger.delete_entry(&entry("A", 0).key).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn run_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let lock = RunLock::acquire(&path).unwrap();
        assert!(matches!(
            RunLock::acquire(&path),
            Err(LedgerError::Locked(_))
        ));
        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }
}
