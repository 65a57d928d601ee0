//! `warmstart manifest` — Fingerprint a directory into a manifest.

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::info;
use warmstart::Manifest;

pub fn execute(
    dir: &Path,
    output: Option<&Path>,
    name: &str,
    metadata: &[String],
) -> anyhow::Result<()> {
    let mut extra = Map::new();
    for entry in metadata {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Invalid metadata {:?}, expected KEY=VALUE", entry);
        };
        if key == "assets" {
            bail!("Metadata key \"assets\" is reserved");
        }
        extra.insert(key.to_string(), Value::String(value.to_string()));
    }

    let manifest = Manifest::generate(dir, name, extra)
        .with_context(|| format!("Failed to fingerprint {}", dir.display()))?;
    let json = manifest.to_json_pretty()?;

    match output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", json))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(assets = manifest.len(), path = %path.display(), "wrote manifest");
        }
        None => println!("{}", json),
    }
    Ok(())
}
