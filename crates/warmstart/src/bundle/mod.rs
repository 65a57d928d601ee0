//! Read-only asset bundles
//!
//! A bundle is a hierarchical, read-only collection of named byte streams:
//! - **directory**: a bundle laid out on disk (development builds)
//! - **archive**: a bundle stored in a zip container (application packages)
//! - **memory**: a bundle held in memory (embedding, tests)
//!
//! Asset paths are forward-slash separated and relative to the bundle root.
//! Nothing in this module can write to a bundle.

mod archive;
mod directory;
mod memory;

pub use archive::ZipBundle;
pub use directory::DirectoryBundle;
pub use memory::MemoryBundle;

use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while reading a bundle
#[derive(Debug, Error)]
pub enum BundleError {
    /// Asset is not present in the bundle
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Asset path escapes the bundle root or is otherwise malformed
    #[error("Invalid asset path: {0}")]
    InvalidPath(String),

    /// IO error while reading an asset
    #[error("Failed to read asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Container format error
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Read-only access to a packaged bundle.
pub trait Bundle {
    /// Open an asset for reading.
    ///
    /// Returns `BundleError::NotFound` if the path does not name a file.
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError>;

    /// Check whether an asset can be opened.
    ///
    /// The probe stream is dropped before returning.
    fn exists(&self, path: &str) -> bool {
        self.open(path).is_ok()
    }

    /// Read a whole asset as UTF-8 text.
    fn read_to_string(&self, path: &str) -> Result<String, BundleError> {
        let mut reader = self.open(path)?;
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|source| BundleError::Io {
                path: path.to_string(),
                source,
            })?;
        Ok(text)
    }
}

impl<B: Bundle + ?Sized> Bundle for Box<B> {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError> {
        (**self).open(path)
    }
}

impl<B: Bundle + ?Sized> Bundle for &B {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>, BundleError> {
        (**self).open(path)
    }
}

/// Open the bundle at `path`: a directory becomes a [`DirectoryBundle`],
/// anything else is read as a zip container.
pub fn open_bundle(path: &Path) -> Result<Box<dyn Bundle>, BundleError> {
    if path.is_dir() {
        Ok(Box::new(DirectoryBundle::new(path)))
    } else {
        Ok(Box::new(ZipBundle::from_file(path)?))
    }
}

/// Normalize an asset path: backslashes become slashes, `.` and empty
/// segments are dropped. Absolute paths and `..` segments are rejected.
pub fn normalize_path(path: &str) -> Result<String, BundleError> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') || unified.contains(':') {
        return Err(BundleError::InvalidPath(path.to_string()));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(BundleError::InvalidPath(path.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(BundleError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}
