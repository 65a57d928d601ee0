//! `warmstart ledger` — List what the ledger records as extracted.

use std::path::Path;

use anyhow::Context;
use warmstart::{HashLedger, JsonFileStore};

pub fn execute(config: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let path = config.ledger_path();
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("Failed to open ledger {}", path.display()))?;
    let entries = HashLedger::new(store).entries();

    if entries.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }

    let width = entries.keys().map(|k| k.len()).max().unwrap_or(0);
    for (asset, fingerprint) in &entries {
        println!("{:<width$}  {}", asset, fingerprint, width = width);
    }
    Ok(())
}
