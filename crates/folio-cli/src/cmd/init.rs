use anyhow::Context;
use folio_core::config::{Config, StoreBackend};
use folio_core::{io, paths};
use std::path::Path;

pub fn run(root: &Path, memory: bool) -> anyhow::Result<()> {
    println!("Initializing folio in: {}", root.display());

    let dir = paths::folio_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        return Ok(());
    }
    let mut cfg = Config::default();
    if memory {
        cfg.store.backend = StoreBackend::Memory;
    }
    cfg.save(root).context("failed to write config.yaml")?;
    println!("  created: {}", paths::CONFIG_FILE);
    Ok(())
}
