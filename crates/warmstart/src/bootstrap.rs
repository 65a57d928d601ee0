//! Bootstrap orchestration
//!
//! Runs, in order: variant resolution, legacy cleanup, pre-extract sync and
//! native library loading. The result is a [`Prepared`] value, the only
//! thing that can hand control to the runtime through a [`StartHook`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::bundle::{open_bundle, Bundle};
use crate::cleanup::{purge_obsolete, CleanupReport, OBSOLETE_CACHE, OBSOLETE_FILES};
use crate::config::BootstrapConfig;
use crate::error::StartupError;
use crate::ledger::{HashLedger, JsonFileStore, KeyValueStore};
use crate::native::{Library, LibraryLoader, LoadedLibraries, NativeLibraries, SystemLoader};
use crate::sync::{SyncEngine, SyncPlan, SyncReport};
use crate::variant::{Variant, VariantResolver};

/// What the runtime is told when it starts.
#[derive(Debug, Clone, Copy)]
pub struct StartContext<'a> {
    /// Writable root
    pub files_dir: &'a Path,

    /// Cache root
    pub cache_dir: &'a Path,

    /// Resolved variant
    pub variant: &'a Variant,

    /// Search path of the pre-extracted assets
    pub search_path: &'a str,

    /// The full manifest document, passed through untouched
    pub build_metadata: &'a Value,

    /// Prefixes the runtime extracts lazily
    pub on_demand: &'a [String],
}

/// Starts the runtime once bootstrap has completed.
pub trait StartHook {
    /// Value returned from the start call.
    type Output;

    /// Start the runtime.
    fn start(self, context: StartContext<'_>) -> Self::Output;
}

impl<F, T> StartHook for F
where
    F: FnOnce(StartContext<'_>) -> T,
{
    type Output = T;

    fn start(self, context: StartContext<'_>) -> T {
        self(context)
    }
}

/// A completed bootstrap.
///
/// Holds the loaded native libraries; keep it alive for as long as the
/// runtime runs.
#[derive(Debug)]
pub struct Prepared<H> {
    files_dir: PathBuf,
    cache_dir: PathBuf,
    variant: Variant,
    on_demand: Vec<String>,
    cleanup: CleanupReport,
    report: SyncReport,
    libraries: LoadedLibraries<H>,
}

impl<H> Prepared<H> {
    /// Resolved variant.
    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Search path of the pre-extracted assets.
    pub fn search_path(&self) -> &str {
        &self.report.search_path
    }

    /// The manifest document.
    pub fn build_metadata(&self) -> &Value {
        self.report.manifest.metadata()
    }

    /// On-demand prefixes with the variant substituted.
    pub fn on_demand(&self) -> &[String] {
        &self.on_demand
    }

    /// Legacy cleanup outcome.
    pub fn cleanup(&self) -> &CleanupReport {
        &self.cleanup
    }

    /// Sync pass outcome.
    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    /// Loaded native libraries.
    pub fn libraries(&self) -> &LoadedLibraries<H> {
        &self.libraries
    }

    /// Hand control to the runtime.
    pub fn start<K: StartHook>(&self, hook: K) -> K::Output {
        info!(variant = %self.variant, "starting runtime");
        hook.start(StartContext {
            files_dir: &self.files_dir,
            cache_dir: &self.cache_dir,
            variant: &self.variant,
            search_path: &self.report.search_path,
            build_metadata: self.report.manifest.metadata(),
            on_demand: &self.on_demand,
        })
    }
}

/// Bootstrap orchestrator.
pub struct Bootstrap<B: Bundle = Box<dyn Bundle>, S: KeyValueStore = JsonFileStore> {
    config: BootstrapConfig,
    bundle: B,
    ledger: HashLedger<S>,
}

impl Bootstrap {
    /// Open the configured bundle and ledger file.
    pub fn from_config(config: BootstrapConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let bundle = open_bundle(&config.paths.bundle)?;
        let store = JsonFileStore::open(config.ledger_path())?;
        Ok(Self::new(config, bundle, store))
    }
}

impl<B: Bundle, S: KeyValueStore> Bootstrap<B, S> {
    /// Create an orchestrator over an already opened bundle and store.
    pub fn new(config: BootstrapConfig, bundle: B, store: S) -> Self {
        Self {
            config,
            bundle,
            ledger: HashLedger::new(store),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The bundle.
    pub fn bundle(&self) -> &B {
        &self.bundle
    }

    /// The extraction ledger.
    pub fn ledger(&self) -> &HashLedger<S> {
        &self.ledger
    }

    fn bundle_probe(&self) -> String {
        let dir = self.config.assets.asset_dir.trim_matches('/');
        if dir.is_empty() {
            self.config.assets.probe.clone()
        } else {
            format!("{}/{}", dir, self.config.assets.probe)
        }
    }

    /// Pick the variant by probing the bundle.
    pub fn resolve_variant(&self) -> Result<Variant, StartupError> {
        let variant = VariantResolver::new(self.bundle_probe())
            .resolve(&self.config.assets.variants, &self.bundle)?;
        info!(variant = %variant, "resolved platform variant");
        Ok(variant)
    }

    /// Remove paths left by earlier releases. Never fails.
    pub fn clean(&self, variant: &Variant) -> CleanupReport {
        let mut report = purge_obsolete(&self.config.target_dir(), OBSOLETE_FILES, variant);
        report.merge(purge_obsolete(
            &self.config.cache_target_dir(),
            OBSOLETE_CACHE,
            variant,
        ));
        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), "removed legacy paths");
        }
        report
    }

    fn engine(&mut self) -> SyncEngine<'_, B, S> {
        let target = self.config.target_dir();
        SyncEngine::new(&self.bundle, &mut self.ledger, target)
            .asset_dir(self.config.assets.asset_dir.as_str())
            .manifest_name(self.config.assets.manifest.as_str())
    }

    /// Compute what a sync would do, without touching the disk.
    pub fn plan(&mut self, variant: &Variant) -> Result<SyncPlan, StartupError> {
        let declared = self.config.declared(variant);
        Ok(self.engine().plan(&declared)?)
    }

    /// Synchronize the pre-extract assets.
    pub fn sync(&mut self, variant: &Variant) -> Result<SyncReport, StartupError> {
        let declared = self.config.declared(variant);
        Ok(self.engine().synchronize(&declared)?)
    }

    /// Run the full bootstrap, loading native libraries from the configured
    /// library directory.
    pub fn prepare(&mut self) -> Result<Prepared<Library>, StartupError> {
        let mut loader = match &self.config.paths.library_dir {
            Some(dir) => SystemLoader::in_dir(dir.clone()),
            None => SystemLoader::new(),
        };
        self.prepare_with(Some(&mut loader))
    }

    /// Run the full bootstrap with a custom loader, or without loading
    /// libraries when `loader` is `None`.
    pub fn prepare_with<L: LibraryLoader>(
        &mut self,
        loader: Option<&mut L>,
    ) -> Result<Prepared<L::Handle>, StartupError> {
        let variant = self.resolve_variant()?;
        let cleanup = self.clean(&variant);
        let report = self.sync(&variant)?;

        let libraries = match loader {
            Some(loader) => NativeLibraries::new(self.config.runtime.library.as_str())
                .load_all(loader)?,
            None => LoadedLibraries::default(),
        };

        info!(search_path = %report.search_path, "bootstrap complete");
        Ok(Prepared {
            files_dir: self.config.paths.files_dir.clone(),
            cache_dir: self.config.paths.cache_dir.clone(),
            on_demand: self.config.on_demand(&variant),
            variant,
            cleanup,
            report,
            libraries,
        })
    }

    /// Unwrap the ledger store.
    pub fn into_store(self) -> S {
        self.ledger.into_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MemoryBundle;
    use crate::ledger::MemoryStore;
    use crate::native::LoadError;
    use crate::sync::{DeclaredAsset, SyncError};
    use std::fs;
    use tempfile::TempDir;

    struct NullLoader(Vec<String>);

    impl LibraryLoader for NullLoader {
        type Handle = ();

        fn load(&mut self, name: &str) -> Result<(), LoadError> {
            self.0.push(name.to_string());
            Ok(())
        }
    }

    fn config(temp: &TempDir) -> BootstrapConfig {
        let mut config = BootstrapConfig::new(
            temp.path().join("files"),
            temp.path().join("cache"),
            temp.path().join("unused"),
        );
        config.assets.variants = vec!["arm64-v8a".to_string(), "x86".to_string()];
        config.assets.on_demand = vec!["app".to_string(), "stdlib-<variant>".to_string()];
        config.assets.pre_extract = vec![
            DeclaredAsset::on_search_path("stdlib-common.imy"),
            DeclaredAsset::on_search_path("bootstrap-native/<variant>"),
            DeclaredAsset::new("cacert.pem"),
        ];
        config
    }

    fn bundle() -> MemoryBundle {
        MemoryBundle::new()
            .with_file(
                "warmstart/build.json",
                r#"{"version": "1.0", "assets": {
                    "stdlib-common.imy": "c1",
                    "stdlib-x86.imy": "s1",
                    "bootstrap-native/x86/_ssl.so": "n1",
                    "bootstrap-native/arm64-v8a/_ssl.so": "n2",
                    "cacert.pem": "p1"
                }}"#,
            )
            .with_file("warmstart/stdlib-common.imy", "common")
            .with_file("warmstart/stdlib-x86.imy", "stdlib")
            .with_file("warmstart/bootstrap-native/x86/_ssl.so", "ssl-x86")
            .with_file("warmstart/bootstrap-native/arm64-v8a/_ssl.so", "ssl-arm")
            .with_file("warmstart/cacert.pem", "pem")
    }

    #[test]
    fn test_prepare_and_start() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let target = config.target_dir();
        let mut bootstrap = Bootstrap::new(config, bundle(), MemoryStore::new());
        let mut loader = NullLoader(Vec::new());

        let prepared = bootstrap.prepare_with(Some(&mut loader)).unwrap();

        assert_eq!(prepared.variant().as_str(), "x86");
        assert_eq!(prepared.on_demand(), ["app", "stdlib-x86"]);
        assert_eq!(prepared.libraries().len(), 5);
        assert_eq!(loader.0[3], "python3.12");
        assert_eq!(
            fs::read_to_string(target.join("bootstrap-native/x86/_ssl.so")).unwrap(),
            "ssl-x86"
        );
        assert!(!target.join("bootstrap-native/arm64-v8a").exists());
        assert!(!target.join("stdlib-x86.imy").exists());

        let seen = prepared.start(|ctx: StartContext<'_>| {
            (
                ctx.build_metadata["version"].as_str().map(str::to_string),
                ctx.search_path.to_string(),
            )
        });
        assert_eq!(seen.0.as_deref(), Some("1.0"));
        assert_eq!(seen.1, prepared.search_path());
        assert!(seen.1.contains("stdlib-common.imy"));
    }

    #[test]
    fn test_unsupported_platform() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.assets.variants = vec!["mips".to_string()];
        let mut bootstrap = Bootstrap::new(config, bundle(), MemoryStore::new());

        let err = bootstrap.prepare_with::<NullLoader>(None).unwrap_err();
        assert!(matches!(
            err,
            StartupError::UnsupportedPlatform { attempted } if attempted == vec!["mips"]
        ));
        assert!(!temp.path().join("files").exists());
    }

    #[test]
    fn test_sync_failure_skips_libraries() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.assets.pre_extract.push(DeclaredAsset::new("ticket.txt"));
        let mut bootstrap = Bootstrap::new(config, bundle(), MemoryStore::new());
        let mut loader = NullLoader(Vec::new());

        let err = bootstrap.prepare_with(Some(&mut loader)).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Sync(SyncError::ExtractionIncomplete { .. })
        ));
        assert!(loader.0.is_empty());
    }

    #[test]
    fn test_legacy_paths_removed() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let target = config.target_dir();
        fs::create_dir_all(target.join("lib-dynload")).unwrap();
        fs::write(target.join("stdlib.zip"), "old").unwrap();
        fs::create_dir_all(config.cache_target_dir().join("AssetFinder/app")).unwrap();

        let mut bootstrap = Bootstrap::new(config, bundle(), MemoryStore::new());
        let prepared = bootstrap.prepare_with::<NullLoader>(None).unwrap();

        assert_eq!(prepared.cleanup().removed.len(), 3);
        assert!(!target.join("lib-dynload").exists());
        assert!(!target.join("stdlib.zip").exists());
        assert!(!temp.path().join("cache/warmstart/AssetFinder").exists());
        assert!(prepared.libraries().is_empty());
    }
}
