//! Warmstart
//!
//! Prepares an on-disk working copy of a read-only asset bundle before an
//! embedded runtime starts, and keeps it in sync across upgrades:
//! - **variant**: platform variant selection by probing the bundle
//! - **sync**: incremental, fingerprint-driven extraction with pruning
//! - **ledger**: persisted record of what is currently on disk
//! - **cleanup**: removal of paths used by earlier releases
//! - **native**: ordered loading of native dependencies
//! - **bootstrap**: the orchestrator tying the above together

pub mod bootstrap;
pub mod bundle;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod native;
pub mod sync;
pub mod variant;

pub use bootstrap::{Bootstrap, Prepared, StartContext, StartHook};
pub use bundle::{Bundle, BundleError, DirectoryBundle, MemoryBundle, ZipBundle};
pub use cleanup::{CleanupFailure, CleanupReport, OBSOLETE_CACHE, OBSOLETE_FILES};
pub use config::{BootstrapConfig, ConfigError, DeclaredAsset};
pub use error::StartupError;
pub use ledger::{HashLedger, JsonFileStore, KeyValueStore, MemoryStore, StoreError, WriteBatch};
pub use manifest::{Manifest, ManifestError};
pub use native::{LibraryLoader, LoadError, LoadedLibraries, NativeLibraries, SystemLoader};
pub use sync::{SyncEngine, SyncError, SyncPlan, SyncReport};
pub use variant::{Variant, VariantResolver, VARIANT_PLACEHOLDER};
