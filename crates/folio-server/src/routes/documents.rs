use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use folio_core::Document;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::{acting_user, required_user};
use crate::state::AppState;

/// GET /api/documents/{id}. Public documents need no identity.
pub async fn get_document(
    State(app): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Document>, AppError> {
    let user = acting_user(&headers)?;
    let doc = app.engine.read(&id, user.as_deref()).await?;
    Ok(Json(doc))
}

/// PUT /api/documents upserts a scope, stage or user.
pub async fn put_document(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(doc): Json<Document>,
) -> Result<Json<Document>, AppError> {
    let user = required_user(&headers)?;
    let written = app.engine.save(doc, Some(&user)).await?;
    Ok(Json(written))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub rev: Option<u64>,
}

/// DELETE /api/documents/{id}?rev=N
pub async fn delete_document(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = required_user(&headers)?;
    app.engine.delete(&id, params.rev, Some(&user)).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
