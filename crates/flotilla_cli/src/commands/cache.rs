//! `cache` command group.

use clap::Subcommand;

use flotilla::cache::DiskCache;

use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove every cached response
    Clean,
}

pub fn run(rt: &Runtime, action: CacheAction) -> anyhow::Result<()> {
    match action {
        CacheAction::Clean => clean(rt),
    }
}

fn clean(rt: &Runtime) -> anyhow::Result<()> {
    let cache = DiskCache::open(&rt.config.cache)?;
    cache.erase_all()?;
    println!("Successfully cleaned up: {}", cache.base_path().display());
    Ok(())
}
