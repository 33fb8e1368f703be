//! Result cache maintenance.

use anyhow::Result;
use reviewflow::cache::ResultCache;
use reviewflow::config::CliOverrides;
use std::path::Path;

use super::super::{CacheCommands, Cli};

pub async fn cmd_cache(cli: &Cli, project_dir: &Path, command: CacheCommands) -> Result<()> {
    let config = super::load_config(cli, project_dir, CliOverrides::default())?;
    let cache = ResultCache::new(config.cache_dir(), config.cache_ttl());

    match command {
        CacheCommands::Stats => {
            let stats = cache.stats().await?;
            println!();
            println!("Cache directory: {}", cache.dir().display());
            println!("  enabled = {}", config.toml.cache.enabled);
            println!("  ttl_secs = {}", config.cache_ttl().as_secs());
            println!("  entries = {}", stats.entries);
            println!("  expired = {}", stats.expired);
            println!();
        }
        CacheCommands::Sweep => {
            let removed = cache.sweep_expired().await?;
            println!("Removed {} expired cache entr{}", removed, plural(removed));
        }
        CacheCommands::Clear => {
            let removed = cache.clear().await?;
            println!("Removed {} cache entr{}", removed, plural(removed));
        }
    }

    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}
