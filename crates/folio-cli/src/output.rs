use folio_core::document::{Action, Document};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Aligned `key  value` lines; rows with an empty value are skipped.
pub fn print_fields(rows: &[(&str, String)]) {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows.iter().filter(|(_, v)| !v.is_empty()) {
        println!("{key:width$}  {value}");
    }
}

pub fn action_rows(a: &Action) -> Vec<(&'static str, String)> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    vec![
        ("id", a.id.clone()),
        ("type", a.action_type.clone()),
        ("rev", a.rev.map(|r| r.to_string()).unwrap_or_default()),
        ("status", a.action_status.to_string()),
        ("agent", a.agent.as_ref().map(|r| r.id.clone()).unwrap_or_default()),
        ("object", opt(&a.object)),
        ("stage", opt(&a.result_of)),
        ("template", opt(&a.instance_of)),
        (
            "triggered by",
            a.triggered_by
                .as_ref()
                .map(|t| format!("{} ({})", t.triggering_id, t.trigger_type))
                .unwrap_or_default(),
        ),
    ]
}

pub fn print_document(doc: &Document) {
    match doc {
        Document::Action(a) => print_fields(&action_rows(a)),
        other => print_fields(&[
            ("id", other.id().to_string()),
            ("rev", other.rev().map(|r| r.to_string()).unwrap_or_default()),
        ]),
    }
}
