//! `warmstart sync` — Clean up and synchronize the pre-extract assets.

use std::path::Path;

pub fn execute(config: &Path) -> anyhow::Result<()> {
    let mut bootstrap = super::open(config)?;
    let variant = bootstrap.resolve_variant()?;
    let cleanup = bootstrap.clean(&variant);
    let report = bootstrap.sync(&variant)?;

    println!("Variant:    {}", variant);
    println!("Extracted:  {}", report.extracted.len());
    for path in &report.extracted {
        println!("  {}", path);
    }
    println!("Current:    {}", report.skipped);
    println!("Pruned:     {}", report.pruned.len());
    if !cleanup.removed.is_empty() {
        println!("Legacy:     {} removed", cleanup.removed.len());
    }
    Ok(())
}
