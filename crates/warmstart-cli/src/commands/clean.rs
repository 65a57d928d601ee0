//! `warmstart clean` — Remove paths left by earlier releases.

use std::path::Path;

pub fn execute(config: &Path) -> anyhow::Result<()> {
    let bootstrap = super::open(config)?;
    let variant = bootstrap.resolve_variant()?;
    let report = bootstrap.clean(&variant);

    for path in &report.removed {
        println!("Removed {}", path.display());
    }
    if report.removed.is_empty() && report.is_clean() {
        println!("Nothing to remove.");
    }
    if !report.is_clean() {
        println!("{} paths could not be removed.", report.failures.len());
    }
    Ok(())
}
