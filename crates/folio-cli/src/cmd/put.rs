use crate::cmd::{open_engine, read_json, runtime, show};
use folio_core::Document;
use std::path::Path;

/// Upsert a scope, stage or user document.
pub fn run(root: &Path, file: &Path, user: Option<&str>, json: bool) -> anyhow::Result<()> {
    let doc: Document = read_json(file)?;
    let engine = open_engine(root)?;
    let written = runtime()?.block_on(engine.save(doc, user))?;
    show(&written, json)
}
