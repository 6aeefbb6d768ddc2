use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use folio_core::{Action, PostMode, PostOptions};
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::required_user;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PostParams {
    #[serde(default)]
    pub rpc: bool,
    #[serde(default)]
    pub mode: PostMode,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub webify: bool,
    #[serde(default)]
    pub add_triggered: bool,
}

/// POST /api/actions runs one action through the orchestrator as the
/// acting user, who must pass the access check.
pub async fn post_action(
    State(app): State<AppState>,
    Query(params): Query<PostParams>,
    headers: HeaderMap,
    Json(action): Json<Action>,
) -> Result<Json<serde_json::Value>, AppError> {
    let opts = PostOptions {
        acl: Some(required_user(&headers)?),
        rpc: params.rpc,
        mode: params.mode,
        strict: params.strict,
        webify: params.webify,
        add_triggered_action_to_result: params.add_triggered,
        ..PostOptions::default()
    };
    let result = app.engine.post(action, opts).await?;
    Ok(Json(serde_json::json!({
        "action": result.action,
        "triggered": result
            .triggered
            .iter()
            .map(|a| a.id.as_str())
            .collect::<Vec<_>>(),
    })))
}
