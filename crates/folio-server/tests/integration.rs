use axum::http::StatusCode;
use folio_core::config::Config;
use folio_core::document::{Role, Scope, User};
use folio_core::Engine;
use folio_server::state::AppState;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ADMIN: &str = "user:root";
const EDITOR: &str = "user:ed";

/// Router over an in-memory engine holding an admin and one scope with an
/// editor.
async fn app() -> axum::Router {
    let engine = Arc::new(Engine::in_memory(Config::default()));
    let admin = User {
        id: ADMIN.into(),
        rev: None,
        email: None,
        admin: true,
    };
    engine.save(admin.into(), None).await.unwrap();
    let mut scope = Scope::new("graph:1");
    scope.editor.push(Role::new("role:ed", "editor").held_by(EDITOR));
    engine.save(scope.into(), None).await.unwrap();
    folio_server::build_router(AppState::new(std::env::temp_dir(), engine))
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut req = axum::http::Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header("x-folio-user", user);
    }
    let body = match body {
        Some(b) => {
            req = req.header("content-type", "application/json");
            axum::body::Body::from(serde_json::to_vec(&b).unwrap())
        }
        None => axum::body::Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn review(id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "@id": id,
        "@type": "ReviewAction",
        "actionStatus": status,
        "isPartOf": "graph:1",
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn post_then_read_as_member() {
    let app = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["action"]["actionStatus"], "ActiveActionStatus");
    assert!(body["action"]["startTime"].is_string());

    let (status, body) = send(&app, "GET", "/api/documents/review:1", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["@id"], "review:1");

    let (status, _) = send(&app, "GET", "/api/documents/review:1", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn completing_fires_dependent() {
    let app = app().await;
    send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(serde_json::json!({
            "@id": "inform:1",
            "@type": "InformAction",
            "object": "review:1",
            "isPartOf": "graph:1",
            "completeOn": "OnObjectCompletedActionStatus",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "CompletedActionStatus")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["triggered"], serde_json::json!(["inform:1"]));
}

#[tokio::test]
async fn stranger_is_forbidden() {
    let app = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/actions",
        Some("user:stranger"),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");
}

#[tokio::test]
async fn anonymous_writes_are_forbidden() {
    let app = app().await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/actions",
        None,
        Some(review("review:9", "ActiveActionStatus")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/documents",
        None,
        Some(serde_json::json!({ "kind": "scope", "@id": "graph:9" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    let (status, _) = send(&app, "DELETE", "/api/documents/review:1?rev=1", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/api/documents/review:9", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stranger_cannot_rewrite_a_roster() {
    let app = app().await;
    let (_, current) = send(&app, "GET", "/api/documents/graph:1", Some(EDITOR), None).await;
    let mut hijacked = current.clone();
    hijacked["editor"] = serde_json::json!([
        { "@id": "role:x", "roleName": "editor", "userId": "user:x" }
    ]);
    let (status, _) = send(
        &app,
        "PUT",
        "/api/documents",
        Some("user:x"),
        Some(hijacked),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "PUT", "/api/documents", Some(EDITOR), Some(current)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn strict_unknown_type_is_400() {
    let app = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/actions?strict=true",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsupported_action_type");
}

#[tokio::test]
async fn stale_rev_is_409_and_retryable() {
    let app = app().await;
    send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    let mut stale = review("review:1", "StagedActionStatus");
    stale["_rev"] = serde_json::json!(9);
    let (status, body) = send(&app, "POST", "/api/actions", Some(EDITOR), Some(stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn missing_document_is_404() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/api/documents/review:none", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn public_scope_is_readable_anonymously() {
    let app = app().await;
    let (status, _) = send(
        &app,
        "PUT",
        "/api/documents",
        Some(ADMIN),
        Some(serde_json::json!({ "kind": "scope", "@id": "graph:pub", "isPublic": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, "GET", "/api/documents/graph:pub", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["@id"], "graph:pub");
}

#[tokio::test]
async fn delete_at_current_rev() {
    let app = app().await;
    send(
        &app,
        "POST",
        "/api/actions",
        Some(EDITOR),
        Some(review("review:1", "ActiveActionStatus")),
    )
    .await;
    let (status, _) = send(&app, "DELETE", "/api/documents/review:1?rev=7", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, "DELETE", "/api/documents/review:1?rev=1", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/documents/review:1", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
