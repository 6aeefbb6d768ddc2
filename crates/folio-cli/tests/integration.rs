use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn folio(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("folio").unwrap();
    cmd.current_dir(dir.path())
        .env("FOLIO_ROOT", dir.path())
        .env_remove("FOLIO_USER");
    cmd
}

fn init_project(dir: &TempDir) {
    folio(dir).arg("init").assert().success();
}

fn write_json(dir: &TempDir, name: &str, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
    path
}

// ---------------------------------------------------------------------------
// folio init / config
// ---------------------------------------------------------------------------

#[test]
fn init_writes_config() {
    let dir = TempDir::new().unwrap();
    folio(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .folio/config.yaml"));
    assert!(dir.path().join(".folio/config.yaml").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    folio(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    folio(&dir)
        .args(["get", "review:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn default_config_validates() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    folio(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn short_lock_ttl_is_flagged() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(
        dir.path().join(".folio/config.yaml"),
        "lock:\n  ttl_secs: 30\nstaleness_window_secs: 60\n",
    )
    .unwrap();
    folio(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning] lock.ttl_secs"));
}

// ---------------------------------------------------------------------------
// folio post / get / delete
// ---------------------------------------------------------------------------

#[test]
fn post_persists_across_invocations() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_json(
        &dir,
        "review.json",
        serde_json::json!({
            "@id": "review:1",
            "@type": "ReviewAction",
            "actionStatus": "ActiveActionStatus",
        }),
    );
    folio(&dir)
        .arg("post")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("ActiveActionStatus"));

    let out = folio(&dir)
        .args(["--json", "get", "review:1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(doc["kind"], "action");
    assert_eq!(doc["_rev"], 1);
    assert!(doc["startTime"].is_string());
}

#[test]
fn completing_reports_triggered_actions() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let review = serde_json::json!({
        "@id": "review:1",
        "@type": "ReviewAction",
        "actionStatus": "ActiveActionStatus",
    });
    let inform = write_json(
        &dir,
        "inform.json",
        serde_json::json!({
            "@id": "inform:1",
            "@type": "InformAction",
            "object": "review:1",
            "completeOn": "OnObjectCompletedActionStatus",
        }),
    );
    let active = write_json(&dir, "active.json", review.clone());
    let mut done = review;
    done["actionStatus"] = "CompletedActionStatus".into();
    let done = write_json(&dir, "done.json", done);

    folio(&dir).arg("post").arg(&active).assert().success();
    folio(&dir).arg("post").arg(&inform).assert().success();
    folio(&dir)
        .arg("post")
        .arg(&done)
        .assert()
        .success()
        .stdout(predicate::str::contains("triggered: inform:1 -> CompletedActionStatus"));
}

#[test]
fn editing_completed_action_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let done = write_json(
        &dir,
        "done.json",
        serde_json::json!({
            "@id": "review:1",
            "@type": "ReviewAction",
            "actionStatus": "CompletedActionStatus",
        }),
    );
    let edited = write_json(
        &dir,
        "edited.json",
        serde_json::json!({
            "@id": "review:1",
            "@type": "ReviewAction",
            "actionStatus": "CompletedActionStatus",
            "object": "graph:other",
        }),
    );
    folio(&dir).arg("post").arg(&done).assert().success();
    folio(&dir)
        .arg("post")
        .arg(&edited)
        .assert()
        .failure()
        .stderr(predicate::str::contains("can no longer change"));
}

#[test]
fn reposting_a_completed_action_is_accepted() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let done = write_json(
        &dir,
        "done.json",
        serde_json::json!({
            "@id": "review:1",
            "@type": "ReviewAction",
            "actionStatus": "CompletedActionStatus",
        }),
    );
    folio(&dir).arg("post").arg(&done).assert().success();
    folio(&dir)
        .arg("post")
        .arg(&done)
        .assert()
        .success()
        .stdout(predicate::str::contains("CompletedActionStatus"));
    folio(&dir)
        .args(["retry", "review:1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no pending triggers"));
}

#[test]
fn retry_refuses_an_open_action() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_json(
        &dir,
        "review.json",
        serde_json::json!({
            "@id": "review:1",
            "@type": "ReviewAction",
            "actionStatus": "ActiveActionStatus",
        }),
    );
    folio(&dir).arg("post").arg(&file).assert().success();
    folio(&dir)
        .args(["retry", "review:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no settled triggers"));
}

#[test]
fn strict_post_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_json(
        &dir,
        "review.json",
        serde_json::json!({ "@id": "review:1", "@type": "ReviewAction" }),
    );
    folio(&dir)
        .args(["post", "--strict"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported action type"));
}

#[test]
fn put_scope_then_read_as_member() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let scope = write_json(
        &dir,
        "scope.json",
        serde_json::json!({
            "kind": "scope",
            "@id": "graph:1",
            "editor": [{ "@id": "role:ed", "roleName": "editor", "userId": "user:ed" }],
        }),
    );
    folio(&dir).arg("put").arg(&scope).assert().success();

    folio(&dir)
        .args(["get", "graph:1", "--user", "user:ed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph:1"));
    folio(&dir)
        .args(["get", "graph:1", "--user", "user:stranger"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("forbidden"));

    folio(&dir)
        .args(["put", "--user", "user:stranger"])
        .arg(&scope)
        .assert()
        .failure()
        .stderr(predicate::str::contains("forbidden"));
    folio(&dir)
        .args(["put", "--user", "user:ed"])
        .arg(&scope)
        .assert()
        .success();
}

#[test]
fn delete_needs_current_rev() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_json(
        &dir,
        "review.json",
        serde_json::json!({ "@id": "review:1", "@type": "ReviewAction" }),
    );
    folio(&dir).arg("post").arg(&file).assert().success();
    folio(&dir)
        .args(["delete", "review:1", "--rev", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("revision conflict"));
    folio(&dir)
        .args(["delete", "review:1", "--rev", "1"])
        .assert()
        .success();
    folio(&dir)
        .args(["get", "review:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
