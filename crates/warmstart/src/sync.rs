//! Incremental asset synchronization
//!
//! Mirrors a declared subset of the bundle into a writable directory.
//! A pass runs in two phases:
//!
//! 1. **plan**: load the manifest, match it against the declared entries and
//!    decide, per asset, whether the copy on disk is current. An asset is
//!    current when the destination file exists and the ledger fingerprint
//!    equals the manifest fingerprint; its content is never re-read.
//! 2. **apply**: extract stale assets (temp file + rename, then stage the
//!    ledger update), prune undeclared entries under every declared
//!    directory, and commit the ledger in one batch.
//!
//! Every file update is atomic and the ledger is committed last, so a pass
//! interrupted at any point can simply be re-run.
//!
//! Two processes syncing the same directory concurrently are not guarded
//! against; callers that can start more than one process must serialize
//! bootstrap themselves.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::bundle::{Bundle, BundleError};
use crate::ledger::{HashLedger, KeyValueStore, StoreError};
use crate::manifest::{Manifest, ManifestError};
use crate::variant::Variant;

/// Separator between entries of the returned search path.
#[cfg(windows)]
pub const SEARCH_PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const SEARCH_PATH_SEPARATOR: char = ':';

/// Default manifest file name inside the bundle's asset directory.
pub const DEFAULT_MANIFEST: &str = "build.json";

/// Errors that can occur during a sync pass
#[derive(Debug, Error)]
pub enum SyncError {
    /// Manifest missing, unreadable or malformed
    #[error("Corrupt bundle: {0}")]
    CorruptBundle(#[from] ManifestError),

    /// An asset listed in the manifest could not be read from the bundle
    #[error("Failed to read bundle asset: {0}")]
    Bundle(#[from] BundleError),

    /// Declared entries that matched nothing in the manifest
    #[error("Failed to extract assets: {missing:?}")]
    ExtractionIncomplete { missing: Vec<String> },

    /// Filesystem failure in the working directory
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Ledger could not be committed
    #[error("Ledger error: {0}")]
    Ledger(#[from] StoreError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SyncError + '_ {
    move |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// An asset path or directory prefix to materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredAsset {
    /// Manifest path, or a prefix matching `path/...` entries
    pub path: String,

    /// Whether the destination joins the runtime search path
    #[serde(default)]
    pub search_path: bool,
}

impl DeclaredAsset {
    /// An entry that is extracted but not put on the search path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            search_path: false,
        }
    }

    /// An entry that is extracted and put on the search path.
    pub fn on_search_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            search_path: true,
        }
    }

    /// Substitute the variant placeholder in the path.
    pub fn for_variant(&self, variant: &Variant) -> Self {
        Self {
            path: variant.substitute(&self.path),
            search_path: self.search_path,
        }
    }

    fn matches(&self, asset: &str) -> bool {
        asset == self.path
            || (asset.len() > self.path.len()
                && asset.starts_with(self.path.as_str())
                && asset.as_bytes()[self.path.len()] == b'/')
    }

    fn expands(&self, asset: &str) -> bool {
        asset != self.path
    }
}

/// One manifest entry selected by a sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    /// Manifest path
    pub path: String,

    /// Manifest fingerprint
    pub fingerprint: String,

    /// Whether the copy on disk must be replaced
    pub stale: bool,
}

/// Outcome of the planning phase; nothing on disk has been touched yet.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    manifest: Manifest,
    declared: Vec<DeclaredAsset>,
    assets: Vec<PlannedAsset>,
    directories: Vec<String>,
}

impl SyncPlan {
    /// The manifest the plan was computed from.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Every selected asset, in manifest order.
    pub fn assets(&self) -> &[PlannedAsset] {
        &self.assets
    }

    /// Assets that will be extracted.
    pub fn stale(&self) -> impl Iterator<Item = &PlannedAsset> {
        self.assets.iter().filter(|a| a.stale)
    }

    /// Assets that are already current.
    pub fn current(&self) -> impl Iterator<Item = &PlannedAsset> {
        self.assets.iter().filter(|a| !a.stale)
    }

    /// Declared entries that expanded as directories and will be pruned.
    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    /// Check whether applying the plan would extract nothing.
    pub fn is_current(&self) -> bool {
        self.assets.iter().all(|a| !a.stale)
    }
}

/// Outcome of a completed sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Search path built from declared entries, in declared order
    pub search_path: String,

    /// Assets written during this pass
    pub extracted: Vec<String>,

    /// Number of assets already current
    pub skipped: usize,

    /// Orphaned files and directories removed
    pub pruned: Vec<PathBuf>,

    /// Whether the ledger was written
    pub ledger_committed: bool,

    /// The manifest used for the pass
    pub manifest: Manifest,
}

/// Directory-membership index over the manifest, built once per pass.
struct ManifestIndex<'m> {
    manifest: &'m Manifest,
    directories: HashSet<&'m str>,
}

impl<'m> ManifestIndex<'m> {
    fn new(manifest: &'m Manifest) -> Self {
        let mut directories = HashSet::new();
        for path in manifest.assets().keys() {
            let mut end = path.len();
            while let Some(slash) = path[..end].rfind('/') {
                if !directories.insert(&path[..slash]) {
                    break;
                }
                end = slash;
            }
        }
        Self {
            manifest,
            directories,
        }
    }

    fn is_file(&self, path: &str) -> bool {
        self.manifest.contains(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.directories.contains(path)
    }
}

/// Synchronizes declared bundle assets into a target directory.
pub struct SyncEngine<'a, B: Bundle + ?Sized, S: KeyValueStore> {
    bundle: &'a B,
    ledger: &'a mut HashLedger<S>,
    target: PathBuf,
    asset_dir: String,
    manifest_name: String,
}

impl<'a, B: Bundle + ?Sized, S: KeyValueStore> SyncEngine<'a, B, S> {
    /// Create an engine extracting into `target`.
    ///
    /// Assets and the manifest are looked up at the bundle root until
    /// [`SyncEngine::asset_dir`] says otherwise.
    pub fn new(bundle: &'a B, ledger: &'a mut HashLedger<S>, target: impl Into<PathBuf>) -> Self {
        Self {
            bundle,
            ledger,
            target: target.into(),
            asset_dir: String::new(),
            manifest_name: DEFAULT_MANIFEST.to_string(),
        }
    }

    /// Directory inside the bundle holding the manifest and assets.
    pub fn asset_dir(mut self, dir: impl Into<String>) -> Self {
        self.asset_dir = dir.into().trim_matches('/').to_string();
        self
    }

    /// Manifest file name inside the asset directory.
    pub fn manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Destination root.
    pub fn target(&self) -> &Path {
        &self.target
    }

    fn bundle_path(&self, path: &str) -> String {
        if self.asset_dir.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.asset_dir, path)
        }
    }

    fn destination(&self, path: &str) -> PathBuf {
        path.split('/')
            .fold(self.target.clone(), |dest, segment| dest.join(segment))
    }

    /// Load the manifest and decide what a sync pass would do.
    ///
    /// Fails with `ExtractionIncomplete` if any declared entry matches no
    /// manifest path.
    pub fn plan(&self, declared: &[DeclaredAsset]) -> Result<SyncPlan, SyncError> {
        let manifest = Manifest::load(self.bundle, &self.bundle_path(&self.manifest_name))?;

        let mut matched = vec![false; declared.len()];
        let mut expanded = vec![false; declared.len()];
        let mut assets = Vec::new();

        for (path, fingerprint) in manifest.assets() {
            let Some(index) = declared.iter().position(|d| d.matches(path)) else {
                continue;
            };
            matched[index] = true;
            if declared[index].expands(path) {
                expanded[index] = true;
            }

            let current = self.destination(path).is_file()
                && self.ledger.fingerprint(path).as_deref() == Some(fingerprint.as_str());
            assets.push(PlannedAsset {
                path: path.clone(),
                fingerprint: fingerprint.clone(),
                stale: !current,
            });
        }

        let missing: Vec<String> = declared
            .iter()
            .zip(&matched)
            .filter(|(_, hit)| !**hit)
            .map(|(d, _)| d.path.clone())
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::ExtractionIncomplete { missing });
        }

        let directories = declared
            .iter()
            .zip(&expanded)
            .filter(|(_, dir)| **dir)
            .map(|(d, _)| d.path.clone())
            .collect();

        Ok(SyncPlan {
            manifest,
            declared: declared.to_vec(),
            assets,
            directories,
        })
    }

    /// Plan and apply a full sync pass.
    ///
    /// Returns the report, whose `search_path` joins the destinations of the
    /// declared entries marked for the search path.
    pub fn synchronize(&mut self, declared: &[DeclaredAsset]) -> Result<SyncReport, SyncError> {
        let plan = self.plan(declared)?;
        self.apply(plan)
    }

    /// Apply a plan produced by [`SyncEngine::plan`].
    pub fn apply(&mut self, plan: SyncPlan) -> Result<SyncReport, SyncError> {
        let result = self.apply_inner(&plan);
        if result.is_err() {
            self.ledger.discard();
        }
        let (extracted, pruned, ledger_committed) = result?;

        let skipped = plan.current().count();
        info!(
            extracted = extracted.len(),
            skipped,
            pruned = pruned.len(),
            "asset sync complete"
        );

        Ok(SyncReport {
            search_path: self.search_path(&plan.declared),
            extracted,
            skipped,
            pruned,
            ledger_committed,
            manifest: plan.manifest,
        })
    }

    fn apply_inner(
        &mut self,
        plan: &SyncPlan,
    ) -> Result<(Vec<String>, Vec<PathBuf>, bool), SyncError> {
        let mut extracted = Vec::new();
        for asset in plan.assets() {
            if asset.stale {
                self.extract(&asset.path)?;
                self.ledger.record(&asset.path, &asset.fingerprint);
                debug!(asset = %asset.path, "extracted");
                extracted.push(asset.path.clone());
            } else {
                debug!(asset = %asset.path, "current");
            }
        }

        let index = ManifestIndex::new(&plan.manifest);
        let mut pruned = Vec::new();
        for dir in plan.directories() {
            let root = self.destination(dir);
            if root.is_dir() {
                self.prune_dir(&root, dir, &index, &mut pruned)?;
            }
        }

        let committed = self.ledger.commit()?;
        Ok((extracted, pruned, committed))
    }

    /// Replace the destination of `path` with the bundle's content.
    fn extract(&self, path: &str) -> Result<(), SyncError> {
        let dest = self.destination(path);
        remove_existing(&dest)?;

        let parent = dest.parent().unwrap_or(&self.target).to_path_buf();
        fs::create_dir_all(&parent).map_err(io_error(&parent))?;
        if !parent.is_dir() {
            return Err(SyncError::Io {
                path: parent,
                source: io::Error::new(io::ErrorKind::Other, "failed to create directory"),
            });
        }

        let mut source = self.bundle.open(&self.bundle_path(path))?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        remove_stale_temps(&parent, &file_name);

        // Dropped (and deleted) on every early return below
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(io_error(&parent))?;

        io::copy(&mut source, &mut tmp).map_err(io_error(&dest))?;
        tmp.as_file().sync_all().map_err(io_error(&dest))?;
        tmp.persist(&dest).map_err(|e| SyncError::Io {
            path: dest.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Remove entries under `dir` that the manifest does not list.
    fn prune_dir(
        &mut self,
        dir: &Path,
        prefix: &str,
        index: &ManifestIndex<'_>,
        pruned: &mut Vec<PathBuf>,
    ) -> Result<(), SyncError> {
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let path = entry.path();
            let relative = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
            let file_type = entry.file_type().map_err(io_error(&path))?;

            if file_type.is_dir() {
                if index.is_dir(&relative) {
                    self.prune_dir(&path, &relative, index, pruned)?;
                } else {
                    fs::remove_dir_all(&path).map_err(io_error(&path))?;
                    debug!(path = %path.display(), "pruned directory");
                    pruned.push(path);
                }
            } else if !index.is_file(&relative) {
                fs::remove_file(&path).map_err(io_error(&path))?;
                self.ledger.forget(&relative);
                debug!(path = %path.display(), "pruned file");
                pruned.push(path);
            }
        }
        Ok(())
    }

    fn search_path(&self, declared: &[DeclaredAsset]) -> String {
        declared
            .iter()
            .filter(|d| d.search_path)
            .map(|d| self.destination(&d.path).to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(&SEARCH_PATH_SEPARATOR.to_string())
    }
}

/// Best-effort removal of temporary siblings left by an interrupted pass.
fn remove_stale_temps(parent: &Path, file_name: &str) {
    let prefix = format!(".{}.", file_name);
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".tmp") {
            let _ = fs::remove_file(entry.path());
        }
    }
}

/// Delete whatever currently occupies `dest`, file or directory.
fn remove_existing(dest: &Path) -> Result<(), SyncError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest).map_err(io_error(dest)),
        Ok(_) => fs::remove_file(dest).map_err(io_error(dest)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(dest)(e)),
    }
}
