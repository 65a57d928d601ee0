//! Bootstrap error types.

use crate::bundle::BundleError;
use crate::config::ConfigError;
use crate::ledger::StoreError;
use crate::native::LoadError;
use crate::sync::SyncError;

/// Errors that abort a bootstrap. None of them is recoverable by retrying
/// within the same process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// No candidate variant has its probe asset in the bundle
    #[error("Unsupported platform: no bundled variant for {attempted:?}")]
    UnsupportedPlatform { attempted: Vec<String> },

    /// Bundle could not be opened
    #[error("{0}")]
    Bundle(#[from] BundleError),

    /// Ledger could not be opened
    #[error("{0}")]
    Ledger(#[from] StoreError),

    /// Asset synchronization failed
    #[error("Asset sync failed: {0}")]
    Sync(#[from] SyncError),

    /// A native dependency failed to load
    #[error("{0}")]
    LibraryLoad(#[from] LoadError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
