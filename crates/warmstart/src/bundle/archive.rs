//! Zip-backed bundle
//!
//! Application packages are zip containers; assets are read straight out of
//! the archive. The archive handle needs `&mut` access to seek, so it sits
//! behind a mutex and each asset is buffered in memory before being handed
//! out.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use parking_lot::Mutex;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{normalize_path, Bundle, BundleError};

/// A bundle stored in a zip archive.
pub struct ZipBundle<R: Read + Seek = File> {
    archive: Mutex<ZipArchive<R>>,
}

impl ZipBundle<File> {
    /// Open the archive at `path`.
    pub fn from_file(path: &Path) -> Result<Self, BundleError> {
        let file = File::open(path).map_err(|source| BundleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> ZipBundle<R> {
    /// Read the archive from any seekable reader.
    pub fn from_reader(reader: R) -> Result<Self, BundleError> {
        let archive = ZipArchive::new(reader).map_err(|e| BundleError::Archive(e.to_string()))?;
        Ok(Self {
            archive: Mutex::new(archive),
        })
    }

    /// Number of entries in the archive, directories included.
    pub fn len(&self) -> usize {
        self.archive.lock().len()
    }

    /// Check if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Read + Seek> Bundle for ZipBundle<R> {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError> {
        let normalized = normalize_path(path)?;
        let mut archive = self.archive.lock();

        let mut entry = match archive.by_name(&normalized) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(BundleError::NotFound(normalized)),
            Err(e) => return Err(BundleError::Archive(format!("{}: {}", normalized, e))),
        };
        if entry.is_dir() {
            return Err(BundleError::NotFound(normalized));
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|source| BundleError::Io {
                path: normalized.clone(),
                source,
            })?;

        Ok(Box::new(Cursor::new(data)))
    }

    /// Looks the name up in the central directory; entry data is not read.
    fn exists(&self, path: &str) -> bool {
        let Ok(normalized) = normalize_path(path) else {
            return false;
        };
        self.archive.lock().index_for_name(&normalized).is_some()
    }
}
