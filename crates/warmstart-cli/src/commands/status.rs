//! `warmstart status` — Show what a sync would do.

use std::path::Path;

pub fn execute(config: &Path) -> anyhow::Result<()> {
    let mut bootstrap = super::open(config)?;
    let variant = bootstrap.resolve_variant()?;
    let plan = bootstrap.plan(&variant)?;

    println!("Variant: {}", variant);
    if plan.is_current() {
        println!("Up to date ({} assets).", plan.assets().len());
        return Ok(());
    }

    for asset in plan.stale() {
        println!("  stale  {}", asset.path);
    }
    println!(
        "{} stale, {} current",
        plan.stale().count(),
        plan.current().count()
    );
    Ok(())
}
