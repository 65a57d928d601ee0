//! `warmstart bootstrap` — Run the full bootstrap.

use std::path::Path;

use serde_json::json;
use warmstart::{StartContext, SystemLoader};

pub fn execute(config: &Path, skip_libraries: bool, as_json: bool) -> anyhow::Result<()> {
    let mut bootstrap = super::open(config)?;

    let prepared = if skip_libraries {
        bootstrap.prepare_with::<SystemLoader>(None)?
    } else {
        bootstrap.prepare()?
    };

    if as_json {
        let context = prepared.start(|ctx: StartContext<'_>| {
            json!({
                "variant": ctx.variant.as_str(),
                "files_dir": ctx.files_dir,
                "cache_dir": ctx.cache_dir,
                "search_path": ctx.search_path,
                "on_demand": ctx.on_demand,
                "build_metadata": ctx.build_metadata,
            })
        });
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else {
        println!("{}", prepared.search_path());
    }
    Ok(())
}
