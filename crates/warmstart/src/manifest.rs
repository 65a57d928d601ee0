//! Bundle manifest (build.json)
//!
//! The manifest is a JSON object whose `assets` member maps every asset path
//! to a content fingerprint. The manifest is the single source of truth for
//! staleness checks. Every other member is build metadata which is handed to
//! the runtime untouched, so the whole document is retained.
//!
//! ```json
//! {
//!   "assets": {
//!     "app/main.bin": "9f86d081...",
//!     "cacert.pem": "60303ae2..."
//!   },
//!   "version": "1.4.0"
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bundle::{normalize_path, Bundle, BundleError};

/// Key of the asset mapping inside the manifest document.
pub const ASSETS_KEY: &str = "assets";

/// Errors that can occur while loading or generating a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest could not be read from the bundle
    #[error("Failed to read manifest: {0}")]
    Bundle(#[from] BundleError),

    /// JSON syntax error
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// Structurally valid JSON with invalid content
    #[error("Invalid manifest: {0}")]
    Invalid(String),

    /// IO error while generating a manifest
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed bundle manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    assets: BTreeMap<String, String>,
    document: Value,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let document: Value = serde_json::from_str(content)?;
        Self::from_value(document)
    }

    /// Build a manifest from an already-parsed JSON document.
    pub fn from_value(document: Value) -> Result<Self, ManifestError> {
        let root = document
            .as_object()
            .ok_or_else(|| ManifestError::Invalid("manifest is not a JSON object".to_string()))?;
        let assets_json = root
            .get(ASSETS_KEY)
            .ok_or_else(|| ManifestError::Invalid(format!("missing `{}` object", ASSETS_KEY)))?
            .as_object()
            .ok_or_else(|| ManifestError::Invalid(format!("`{}` is not an object", ASSETS_KEY)))?;

        let mut assets = BTreeMap::new();
        for (path, fingerprint) in assets_json {
            validate_asset_path(path)?;
            let fingerprint = fingerprint.as_str().ok_or_else(|| {
                ManifestError::Invalid(format!("fingerprint of {} is not a string", path))
            })?;
            assets.insert(path.clone(), fingerprint.to_string());
        }

        Ok(Self { assets, document })
    }

    /// Load and parse the manifest at `path` inside a bundle.
    pub fn load<B: Bundle + ?Sized>(bundle: &B, path: &str) -> Result<Self, ManifestError> {
        let content = bundle.read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Build a manifest from `(path, fingerprint)` pairs with no extra
    /// metadata.
    pub fn from_assets<I, P, F>(assets: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = (P, F)>,
        P: Into<String>,
        F: Into<String>,
    {
        let map: Map<String, Value> = assets
            .into_iter()
            .map(|(p, f)| (p.into(), Value::String(f.into())))
            .collect();
        let mut root = Map::new();
        root.insert(ASSETS_KEY.to_string(), Value::Object(map));
        Self::from_value(Value::Object(root))
    }

    /// Generate a manifest for every file under `dir`, fingerprinted with
    /// SHA-256.
    ///
    /// `manifest_name` (relative to `dir`) is skipped so regenerating a
    /// manifest in place does not fingerprint itself. `extra` members are
    /// carried into the document as build metadata.
    pub fn generate(
        dir: &Path,
        manifest_name: &str,
        extra: Map<String, Value>,
    ) -> Result<Self, ManifestError> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;

        let mut assets = Map::new();
        for (relative, path) in files {
            if relative == manifest_name {
                continue;
            }
            assets.insert(relative, Value::String(fingerprint_file(&path)?));
        }

        let mut root = extra;
        root.insert(ASSETS_KEY.to_string(), Value::Object(assets));
        Self::from_value(Value::Object(root))
    }

    /// Current fingerprint of an asset.
    pub fn fingerprint(&self, path: &str) -> Option<&str> {
        self.assets.get(path).map(|s| s.as_str())
    }

    /// Check whether `path` names an asset.
    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    /// All assets, sorted by path.
    pub fn assets(&self) -> &BTreeMap<String, String> {
        &self.assets
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the manifest declares no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// The full manifest document, passed through to the runtime.
    pub fn metadata(&self) -> &Value {
        &self.document
    }

    /// Consume the manifest, keeping only the document.
    pub fn into_metadata(self) -> Value {
        self.document
    }

    /// Serialize the manifest document.
    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(&self.document)?)
    }
}

/// Asset paths must already be in normal form: relative, `/`-separated,
/// with no empty, `.` or `..` segments.
fn validate_asset_path(path: &str) -> Result<(), ManifestError> {
    match normalize_path(path) {
        Ok(normalized) if normalized == path => Ok(()),
        _ => Err(ManifestError::Invalid(format!("invalid asset path: {:?}", path))),
    }
}

/// SHA-256 of a file's contents, hex-encoded.
pub fn fingerprint_file(path: &Path) -> Result<String, ManifestError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn collect_files(
    base: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::path::PathBuf)>,
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((relative, path));
        }
    }
    Ok(())
}
