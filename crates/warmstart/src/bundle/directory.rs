//! Directory-backed bundle
//!
//! Assets resolve relative to a root directory on disk.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::{normalize_path, Bundle, BundleError};

/// A bundle whose assets are plain files under `root`.
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    root: PathBuf,
}

impl DirectoryBundle {
    /// Create a bundle rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The bundle root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Bundle for DirectoryBundle {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError> {
        let normalized = normalize_path(path)?;
        let full = self.root.join(&normalized);

        // File::open succeeds on directories on unix
        if full.is_dir() {
            return Err(BundleError::NotFound(normalized));
        }

        match File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BundleError::NotFound(normalized))
            }
            Err(source) => Err(BundleError::Io {
                path: normalized,
                source,
            }),
        }
    }
}
