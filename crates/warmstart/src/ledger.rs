//! Extraction ledger
//!
//! Records, for every extracted asset, the fingerprint of the content that is
//! currently on disk. The ledger sits on top of a small persistent key-value
//! store; keys are asset paths under the `asset.` namespace.
//!
//! Updates are staged in a [`WriteBatch`] and committed in one go at the end
//! of a sync pass, so a crash mid-pass leaves the previous, still truthful,
//! ledger in place.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Namespace prefix of ledger keys in the backing store.
pub const LEDGER_NAMESPACE: &str = "asset.";

/// Errors that can occur in a ledger store
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error while reading or committing the store
    #[error("Ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to serialize the store
    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A set of updates applied to a store atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    puts: BTreeMap<String, String>,
    removes: BTreeSet<String>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `key = value`, cancelling any staged removal of `key`.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.removes.remove(&key);
        self.puts.insert(key, value.into());
    }

    /// Stage removal of `key`, cancelling any staged put.
    pub fn remove(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.puts.remove(&key);
        self.removes.insert(key);
    }

    /// Staged value for `key`: `Some(Some(v))` if put, `Some(None)` if
    /// removed, `None` if untouched.
    pub fn staged(&self, key: &str) -> Option<Option<&str>> {
        if let Some(value) = self.puts.get(key) {
            return Some(Some(value.as_str()));
        }
        if self.removes.contains(key) {
            return Some(None);
        }
        None
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.puts.len() + self.removes.len()
    }

    /// Check if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }

    /// Apply the batch to a map.
    pub fn apply_to(&self, map: &mut BTreeMap<String, String>) {
        for key in &self.removes {
            map.remove(key);
        }
        for (key, value) in &self.puts {
            map.insert(key.clone(), value.clone());
        }
    }
}

/// Persistent string key-value store backing the ledger.
pub trait KeyValueStore {
    /// Committed value for `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// All committed keys.
    fn keys(&self) -> Vec<String>;

    /// Durably apply every operation in `batch`, all or nothing.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Key-value store persisted as a JSON object file.
///
/// Commits write the whole object to a temporary sibling, sync it and
/// rename it over the store file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable JSON document is
    /// also treated as empty, which makes every asset look stale and forces
    /// a full re-extraction.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable ledger");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, entries })
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut next = self.entries.clone();
        batch.apply_to(&mut next);
        let content = serde_json::to_string_pretty(&next)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".ledger.")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| self.io_error(e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        self.entries = next;
        Ok(())
    }
}

/// In-memory store; counts commits so callers can observe write traffic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    commits: usize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits applied so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        batch.apply_to(&mut self.entries);
        self.commits += 1;
        Ok(())
    }
}

/// Asset path → fingerprint record of what is on disk.
#[derive(Debug)]
pub struct HashLedger<S: KeyValueStore> {
    store: S,
    pending: WriteBatch,
}

impl<S: KeyValueStore> HashLedger<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: WriteBatch::new(),
        }
    }

    fn key(path: &str) -> String {
        format!("{}{}", LEDGER_NAMESPACE, path)
    }

    /// Fingerprint recorded for `path`, staged updates included.
    pub fn fingerprint(&self, path: &str) -> Option<String> {
        let key = Self::key(path);
        match self.pending.staged(&key) {
            Some(staged) => staged.map(str::to_string),
            None => self.store.get(&key),
        }
    }

    /// Stage `path -> fingerprint`.
    pub fn record(&mut self, path: &str, fingerprint: &str) {
        self.pending.put(Self::key(path), fingerprint);
    }

    /// Stage removal of `path`, if it has a record.
    pub fn forget(&mut self, path: &str) {
        if self.fingerprint(path).is_some() {
            self.pending.remove(Self::key(path));
        }
    }

    /// Number of staged operations.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all staged operations.
    pub fn discard(&mut self) {
        self.pending = WriteBatch::new();
    }

    /// Commit staged operations as one batch.
    ///
    /// Returns `false` without touching the store when nothing is staged.
    pub fn commit(&mut self) -> Result<bool, StoreError> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        let batch = std::mem::take(&mut self.pending);
        self.store.commit(batch)?;
        Ok(true)
    }

    /// Committed records, keyed by asset path.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|key| {
                let path = key.strip_prefix(LEDGER_NAMESPACE)?.to_string();
                let value = self.store.get(&key)?;
                Some((path, value))
            })
            .collect()
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Unwrap the backing store, dropping staged operations.
    pub fn into_store(self) -> S {
        self.store
    }
}
