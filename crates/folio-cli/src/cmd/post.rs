use crate::cmd::{open_engine, read_json, runtime};
use crate::output::{action_rows, print_fields, print_json};
use folio_core::{Action, PostOptions, PostResult};
use std::path::Path;

pub struct PostArgs<'a> {
    pub file: &'a Path,
    pub user: Option<String>,
    pub triggered: bool,
    pub rpc: bool,
    pub strict: bool,
}

pub fn run(root: &Path, args: PostArgs<'_>, json: bool) -> anyhow::Result<()> {
    let action: Action = read_json(args.file)?;
    let engine = open_engine(root)?;
    let opts = PostOptions {
        acl: args.user,
        triggered: args.triggered,
        rpc: args.rpc,
        strict: args.strict,
        ..PostOptions::default()
    };
    let result = runtime()?.block_on(engine.post(action, opts))?;
    report(&result, json)
}

/// Replay the triggers of a settled action after a partial failure.
pub fn retry(root: &Path, id: &str, user: Option<String>, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let opts = PostOptions {
        acl: user,
        ..PostOptions::default()
    };
    let result = runtime()?.block_on(engine.retry_triggers(id, opts))?;
    if !json && result.triggered.is_empty() {
        println!("no pending triggers for {id}");
        return Ok(());
    }
    report(&result, json)
}

fn report(result: &PostResult, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "action": result.action,
            "triggered": result.triggered,
        }));
    }
    print_fields(&action_rows(&result.action));
    for t in &result.triggered {
        println!("triggered: {} -> {}", t.id, t.action_status);
    }
    Ok(())
}
