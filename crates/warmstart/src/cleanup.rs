//! Removal of paths left behind by earlier releases
//!
//! Files and directories that older releases extracted, but which the current
//! layout no longer uses, are deleted on every bootstrap. Deletion is best
//! effort: every entry is attempted, failures are logged and collected, and
//! none of them stops startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bundle::normalize_path;
use crate::variant::Variant;

/// Obsolete entries under the writable files directory.
pub const OBSOLETE_FILES: &[&str] = &[
    // No longer pre-extracted
    "app.zip",
    "requirements.zip",
    // Earlier archive names
    "warmstart.mp3",
    "stdlib.mp3",
    "warmstart.zip",
    // Split into bootstrap-native and per-variant stdlib archives
    "lib-dynload",
    // Renamed to stdlib-common
    "stdlib.zip",
    // Renamed to .imy
    "bootstrap.zip",
    "stdlib-common.zip",
];

/// Obsolete entries under the cache directory.
pub const OBSOLETE_CACHE: &[&str] = &[
    // Lazy extraction root, now under the files directory
    "AssetFinder",
];

/// A legacy path that could not be removed.
#[derive(Debug)]
pub struct CleanupFailure {
    /// Path that failed
    pub path: PathBuf,

    /// Underlying error
    pub error: io::Error,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Legacy entries that existed and were removed
    pub removed: Vec<PathBuf>,

    /// Every path that could not be removed
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Check whether every deletion succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.removed.extend(other.removed);
        self.failures.extend(other.failures);
    }
}

/// Delete each legacy entry under `root`, with [`VARIANT_PLACEHOLDER`]
/// substituted.
///
/// Missing entries are skipped silently.
///
/// [`VARIANT_PLACEHOLDER`]: crate::variant::VARIANT_PLACEHOLDER
pub fn purge_obsolete<S: AsRef<str>>(root: &Path, entries: &[S], variant: &Variant) -> CleanupReport {
    let mut report = CleanupReport::default();

    for entry in entries {
        let resolved = variant.substitute(entry.as_ref());
        let relative = match normalize_path(&resolved) {
            Ok(relative) => relative,
            Err(e) => {
                report.failures.push(CleanupFailure {
                    path: PathBuf::from(&resolved),
                    error: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
                });
                continue;
            }
        };

        let path = relative
            .split('/')
            .fold(root.to_path_buf(), |p, segment| p.join(segment));
        match fs::symlink_metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => {
                report.failures.push(CleanupFailure { path, error });
                continue;
            }
        }

        let before = report.failures.len();
        remove_recursive(&path, &mut report.failures);
        if report.failures.len() == before {
            debug!(path = %path.display(), "removed legacy path");
            report.removed.push(path);
        }
    }

    for failure in &report.failures {
        warn!(path = %failure.path.display(), error = %failure.error, "failed to remove legacy path");
    }
    report
}

/// Depth-first delete: children first, then the entry itself. Keeps going
/// after failures, recording each one.
fn remove_recursive(path: &Path, failures: &mut Vec<CleanupFailure>) {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(error) => {
            failures.push(CleanupFailure {
                path: path.to_path_buf(),
                error,
            });
            return;
        }
    };

    let result = if meta.is_dir() {
        match fs::read_dir(path) {
            Ok(children) => {
                for child in children {
                    match child {
                        Ok(child) => remove_recursive(&child.path(), failures),
                        Err(error) => failures.push(CleanupFailure {
                            path: path.to_path_buf(),
                            error,
                        }),
                    }
                }
            }
            Err(error) => failures.push(CleanupFailure {
                path: path.to_path_buf(),
                error,
            }),
        }
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(error) => failures.push(CleanupFailure {
            path: path.to_path_buf(),
            error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_purge_files_and_variant_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("old.zip"), b"zip").unwrap();
        fs::create_dir_all(root.join("old-cache/x86/deep")).unwrap();
        fs::write(root.join("old-cache/x86/deep/file.bin"), b"bin").unwrap();
        fs::create_dir_all(root.join("old-cache/arm")).unwrap();

        let report = purge_obsolete(root, &["old.zip", "old-cache/<variant>"], &Variant::new("x86"));

        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 2);
        assert!(!root.join("old.zip").exists());
        assert!(!root.join("old-cache/x86").exists());
        assert!(root.join("old-cache/arm").exists());
    }

    #[test]
    fn test_absent_entries_are_silent() {
        let temp = TempDir::new().unwrap();
        let report = purge_obsolete(
            temp.path(),
            &["old.zip", "old-cache/<variant>"],
            &Variant::new("x86"),
        );
        assert!(report.is_clean());
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_escaping_entry_is_a_failure_not_a_delete() {
        let temp = TempDir::new().unwrap();
        let inner = temp.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(temp.path().join("keep.txt"), b"keep").unwrap();
        fs::write(inner.join("gone.txt"), b"gone").unwrap();

        let report = purge_obsolete(&inner, &["../keep.txt", "gone.txt"], &Variant::new("x"));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.removed, vec![inner.join("gone.txt")]);
        assert!(temp.path().join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_does_not_stop_cleanup() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("locked")).unwrap();
        fs::write(root.join("locked/file.bin"), b"x").unwrap();
        fs::write(root.join("other.zip"), b"x").unwrap();
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o555)).unwrap();

        let report = purge_obsolete(root, &["locked", "other.zip"], &Variant::new("x"));

        // Permission bits are not enforced for root, so `locked` may be gone
        if root.join("locked").exists() {
            fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
        }
        if report.is_clean() {
            return;
        }
        assert!(!root.join("other.zip").exists());
        assert_eq!(report.removed, vec![root.join("other.zip")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_parent_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("sealed/old")).unwrap();
        fs::set_permissions(root.join("sealed"), fs::Permissions::from_mode(0o000)).unwrap();

        let report = purge_obsolete(root, &["sealed/old", "absent.zip"], &Variant::new("x"));

        fs::set_permissions(root.join("sealed"), fs::Permissions::from_mode(0o755)).unwrap();

        // Root can stat through a mode-000 directory
        if report.removed.len() == 1 {
            return;
        }
        assert!(report.removed.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, root.join("sealed").join("old"));
        assert!(root.join("sealed/old").exists());
    }

    #[test]
    fn test_obsolete_lists_are_relative() {
        for entry in OBSOLETE_FILES.iter().chain(OBSOLETE_CACHE) {
            let resolved = Variant::new("x86").substitute(entry);
            assert!(normalize_path(&resolved).is_ok(), "{}", entry);
        }
    }

    #[test]
    fn test_merge_reports() {
        let mut a = CleanupReport::default();
        a.removed.push(PathBuf::from("a"));
        let mut b = CleanupReport::default();
        b.removed.push(PathBuf::from("b"));
        a.merge(b);
        assert_eq!(a.removed.len(), 2);
    }
}
