use crate::cmd::{open_engine, runtime, show};
use std::path::Path;

/// Fetch a document. Without `--user` this is the store read; with it the
/// access check applies as it does over HTTP.
pub fn run(root: &Path, id: &str, user: Option<&str>, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let rt = runtime()?;
    let doc = match user {
        Some(user) => rt.block_on(engine.read(id, Some(user)))?,
        None => rt.block_on(engine.get(id))?,
    };
    show(&doc, json)
}
