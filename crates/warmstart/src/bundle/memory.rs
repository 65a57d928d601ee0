//! In-memory bundle

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use super::{normalize_path, Bundle, BundleError};

/// A bundle whose assets live in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBundle {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset, replacing any previous content at the same path.
    ///
    /// Paths that cannot be normalized are stored verbatim and will never
    /// be openable.
    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        let key = normalize_path(path).unwrap_or_else(|_| path.to_string());
        self.entries.insert(key, data.into());
    }

    /// Builder form of [`MemoryBundle::insert`].
    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    /// Remove an asset.
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        let key = normalize_path(path).ok()?;
        self.entries.remove(&key)
    }

    /// All asset paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Bundle for MemoryBundle {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError> {
        let normalized = normalize_path(path)?;
        match self.entries.get(&normalized) {
            Some(data) => Ok(Box::new(Cursor::new(data.as_slice()))),
            None => Err(BundleError::NotFound(normalized)),
        }
    }
}
