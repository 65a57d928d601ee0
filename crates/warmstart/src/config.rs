//! Bootstrap configuration (warmstart.toml)
//!
//! Describes where the bundle lives, where the working copy goes, which
//! assets are extracted before the runtime starts and which native runtime
//! library to load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle::normalize_path;
use crate::sync::DEFAULT_MANIFEST;
use crate::variant::{Variant, VARIANT_PLACEHOLDER};

pub use crate::sync::DeclaredAsset;

/// Default ledger file name, created in the files directory.
pub const DEFAULT_LEDGER: &str = "warmstart-ledger.json";

/// Errors that can occur during configuration parsing
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Bootstrap configuration (warmstart.toml)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapConfig {
    /// Filesystem locations
    pub paths: PathsConfig,

    /// Asset selection
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Runtime library settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Writable root; the working copy lives in `<files_dir>/<asset_dir>`
    pub files_dir: PathBuf,

    /// Cache-only root, swept for legacy entries
    pub cache_dir: PathBuf,

    /// Bundle directory or zip archive
    pub bundle: PathBuf,

    /// Directory holding native libraries (loader search path if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_dir: Option<PathBuf>,

    /// Ledger file (`<files_dir>/warmstart-ledger.json` if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<PathBuf>,
}

/// Asset selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetsConfig {
    /// Directory inside the bundle, mirrored under the files directory
    #[serde(default = "default_asset_dir")]
    pub asset_dir: String,

    /// Manifest file name inside `asset_dir`
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Probe asset template used to pick the variant
    #[serde(default = "default_probe")]
    pub probe: String,

    /// Candidate variants, most preferred first
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,

    /// Prefixes the runtime extracts lazily; passed through to the start hook
    #[serde(default = "default_on_demand")]
    pub on_demand: Vec<String>,

    /// Assets extracted before the runtime starts
    #[serde(default = "default_pre_extract")]
    pub pre_extract: Vec<DeclaredAsset>,
}

/// Runtime library settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Language runtime library name, without platform prefix or suffix
    #[serde(default = "default_runtime_library")]
    pub library: String,
}

fn default_asset_dir() -> String {
    "warmstart".to_string()
}

fn default_manifest() -> String {
    DEFAULT_MANIFEST.to_string()
}

fn default_probe() -> String {
    "stdlib-<variant>.imy".to_string()
}

/// Variants the host CPU can run, most preferred first.
fn default_variants() -> Vec<String> {
    let variants: &[&str] = match std::env::consts::ARCH {
        "aarch64" => &["arm64-v8a", "armeabi-v7a"],
        "arm" => &["armeabi-v7a"],
        "x86_64" => &["x86_64", "x86"],
        "x86" => &["x86"],
        other => return vec![other.to_string()],
    };
    variants.iter().map(|v| v.to_string()).collect()
}

fn default_on_demand() -> Vec<String> {
    ["app", "requirements", "stdlib-<variant>"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_pre_extract() -> Vec<DeclaredAsset> {
    vec![
        DeclaredAsset::on_search_path("stdlib-common.imy"),
        DeclaredAsset::on_search_path("bootstrap.imy"),
        DeclaredAsset::on_search_path("bootstrap-native/<variant>"),
        DeclaredAsset::new("cacert.pem"),
        DeclaredAsset::new("ticket.txt"),
    ]
}

fn default_runtime_library() -> String {
    crate::native::DEFAULT_RUNTIME_LIBRARY.to_string()
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            manifest: default_manifest(),
            probe: default_probe(),
            variants: default_variants(),
            on_demand: default_on_demand(),
            pre_extract: default_pre_extract(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library: default_runtime_library(),
        }
    }
}

impl BootstrapConfig {
    /// Configuration with default asset and runtime settings.
    pub fn new(
        files_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        bundle: impl Into<PathBuf>,
    ) -> Self {
        Self {
            paths: PathsConfig {
                files_dir: files_dir.into(),
                cache_dir: cache_dir.into(),
                bundle: bundle.into(),
                library_dir: None,
                ledger: None,
            },
            assets: AssetsConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }

    /// Parse a configuration file, resolving relative paths against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    /// Parse a configuration from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BootstrapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let assets = &self.assets;

        if assets.variants.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one variant must be listed".to_string(),
            ));
        }
        if assets.variants.iter().any(|v| v.is_empty() || v.contains('/')) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid variant in {:?}",
                assets.variants
            )));
        }

        if !assets.probe.contains(VARIANT_PLACEHOLDER) {
            return Err(ConfigError::ValidationError(format!(
                "Probe {} must contain {}",
                assets.probe, VARIANT_PLACEHOLDER
            )));
        }
        validate_asset_path("probe", &assets.probe)?;
        validate_asset_path("manifest", &assets.manifest)?;
        if !assets.asset_dir.is_empty() {
            validate_asset_path("asset_dir", &assets.asset_dir)?;
        }

        for entry in &assets.pre_extract {
            validate_asset_path("pre_extract", &entry.path)?;
        }
        for prefix in &assets.on_demand {
            validate_asset_path("on_demand", prefix)?;
        }

        if self.runtime.library.is_empty() {
            return Err(ConfigError::ValidationError(
                "Runtime library name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Write the configuration to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_relative(&mut self, base: &Path) {
        let paths = &mut self.paths;
        for path in [&mut paths.files_dir, &mut paths.cache_dir, &mut paths.bundle] {
            resolve(path, base);
        }
        for path in [&mut paths.library_dir, &mut paths.ledger].into_iter().flatten() {
            resolve(path, base);
        }
    }

    /// Directory the working copy is synchronized into.
    pub fn target_dir(&self) -> PathBuf {
        join_asset_dir(&self.paths.files_dir, &self.assets.asset_dir)
    }

    /// Directory swept for legacy cache entries.
    pub fn cache_target_dir(&self) -> PathBuf {
        join_asset_dir(&self.paths.cache_dir, &self.assets.asset_dir)
    }

    /// Ledger file location.
    pub fn ledger_path(&self) -> PathBuf {
        match &self.paths.ledger {
            Some(path) => path.clone(),
            None => self.paths.files_dir.join(DEFAULT_LEDGER),
        }
    }

    /// Pre-extract entries with the variant substituted.
    pub fn declared(&self, variant: &Variant) -> Vec<DeclaredAsset> {
        self.assets
            .pre_extract
            .iter()
            .map(|d| d.for_variant(variant))
            .collect()
    }

    /// On-demand prefixes with the variant substituted.
    pub fn on_demand(&self, variant: &Variant) -> Vec<String> {
        self.assets
            .on_demand
            .iter()
            .map(|p| variant.substitute(p))
            .collect()
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn join_asset_dir(root: &Path, asset_dir: &str) -> PathBuf {
    asset_dir
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |p, segment| p.join(segment))
}

/// Asset paths must already be in normal form, since they are compared
/// verbatim against manifest paths.
fn validate_asset_path(field: &str, path: &str) -> Result<(), ConfigError> {
    let probe = path.replace(VARIANT_PLACEHOLDER, "variant");
    match normalize_path(&probe) {
        Ok(normal) if normal == probe => Ok(()),
        _ => Err(ConfigError::ValidationError(format!(
            "Invalid {} path: {:?} (must be relative, '/'-separated, without '..')",
            field, path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[paths]
files_dir = "/data/files"
cache_dir = "/data/cache"
bundle = "/data/app.zip"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = BootstrapConfig::from_str(MINIMAL).unwrap();
        assert_eq!(config.assets.asset_dir, "warmstart");
        assert_eq!(config.assets.manifest, "build.json");
        assert_eq!(config.assets.probe, "stdlib-<variant>.imy");
        assert!(!config.assets.variants.is_empty());
        assert_eq!(config.runtime.library, "python3.12");
        assert_eq!(config.target_dir(), PathBuf::from("/data/files/warmstart"));
        assert_eq!(config.cache_target_dir(), PathBuf::from("/data/cache/warmstart"));
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/data/files/warmstart-ledger.json")
        );
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[paths]
files_dir = "/data/files"
cache_dir = "/data/cache"
bundle = "/data/app"
library_dir = "/data/lib"

[assets]
asset_dir = "assets/py"
variants = ["x86"]
on_demand = ["app", "stdlib-<variant>"]

[[assets.pre_extract]]
path = "stdlib-common.imy"
search_path = true

[[assets.pre_extract]]
path = "cacert.pem"

[runtime]
library = "python3.11"
"#;
        let config = BootstrapConfig::from_str(toml).unwrap();
        let variant = Variant::new("x86");

        assert_eq!(config.paths.library_dir, Some(PathBuf::from("/data/lib")));
        assert_eq!(
            config.declared(&variant),
            vec![
                DeclaredAsset::on_search_path("stdlib-common.imy"),
                DeclaredAsset::new("cacert.pem"),
            ]
        );
        assert_eq!(config.on_demand(&variant), vec!["app", "stdlib-x86"]);
        assert_eq!(config.target_dir(), PathBuf::from("/data/files/assets/py"));
        assert_eq!(config.runtime.library, "python3.11");
    }

    #[test]
    fn test_missing_paths() {
        let result = BootstrapConfig::from_str("[assets]\nvariants = [\"x86\"]\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_configs() {
        let cases = [
            "[assets]\nvariants = []\n",
            "[assets]\nprobe = \"stdlib.imy\"\n",
            "[[assets.pre_extract]]\npath = \"\"\n",
            "[[assets.pre_extract]]\npath = \"/etc/passwd\"\n",
            "[[assets.pre_extract]]\npath = \"../outside\"\n",
            "[[assets.pre_extract]]\npath = \"a//b\"\n",
            "[runtime]\nlibrary = \"\"\n",
        ];
        for case in cases {
            let toml = format!("{}\n{}", MINIMAL, case);
            assert!(
                matches!(
                    BootstrapConfig::from_str(&toml),
                    Err(ConfigError::ValidationError(_))
                ),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_relative_paths_resolved() {
        let mut config = BootstrapConfig::new("files", "/abs/cache", "app.zip");
        config.paths.library_dir = Some(PathBuf::from("lib"));
        config.resolve_relative(Path::new("/srv/app"));

        assert_eq!(config.paths.files_dir, PathBuf::from("/srv/app/files"));
        assert_eq!(config.paths.cache_dir, PathBuf::from("/abs/cache"));
        assert_eq!(config.paths.bundle, PathBuf::from("/srv/app/app.zip"));
        assert_eq!(config.paths.library_dir, Some(PathBuf::from("/srv/app/lib")));
    }

    #[test]
    fn test_default_pre_extract_is_valid() {
        let config = BootstrapConfig::new("/f", "/c", "/b");
        config.validate().unwrap();
        let declared = config.declared(&Variant::new("arm64-v8a"));
        assert!(declared
            .iter()
            .any(|d| d.path == "bootstrap-native/arm64-v8a" && d.search_path));
    }
}
