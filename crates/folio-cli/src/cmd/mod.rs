pub mod config;
pub mod delete;
pub mod get;
pub mod init;
pub mod post;
pub mod put;
pub mod serve;

use anyhow::Context;
use folio_core::config::Config;
use folio_core::document::Document;
use folio_core::Engine;
use std::path::Path;

/// Engine over the backend configured under `root`.
pub fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    let config = Config::load(root).context("failed to load config")?;
    Engine::open(root, config).context("failed to open store")
}

/// Read a JSON document from `path`, or stdin when `path` is `-`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&data).with_context(|| format!("{} is not a valid document", path.display()))
}

/// Current-thread runtime for one command.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")
}

pub fn show(doc: &Document, json: bool) -> anyhow::Result<()> {
    if json {
        crate::output::print_json(doc)
    } else {
        crate::output::print_document(doc);
        Ok(())
    }
}
