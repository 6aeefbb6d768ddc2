use crate::cmd::{open_engine, runtime};
use std::path::Path;

pub fn run(root: &Path, id: &str, rev: u64, user: Option<&str>) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    runtime()?.block_on(engine.delete(id, Some(rev), user))?;
    println!("deleted {id}");
    Ok(())
}
