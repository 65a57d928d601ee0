//! Subcommand implementations.

pub mod bootstrap;
pub mod clean;
pub mod ledger;
pub mod manifest;
pub mod status;
pub mod sync;

use anyhow::Context;
use std::path::Path;
use warmstart::{Bootstrap, BootstrapConfig};

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<BootstrapConfig> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Invalid configuration path {}", path.display()))?;
    BootstrapConfig::from_file(&absolute)
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}

/// Load the configuration and open its bundle and ledger.
pub fn open(path: &Path) -> anyhow::Result<Bootstrap> {
    let config = load_config(path)?;
    let bundle = config.paths.bundle.clone();
    Bootstrap::from_config(config)
        .with_context(|| format!("Failed to open bundle {}", bundle.display()))
}
