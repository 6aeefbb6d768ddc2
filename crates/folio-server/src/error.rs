use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use folio_core::error::FolioError;

/// Private sentinel for 400s raised by the HTTP layer itself (bad headers,
/// malformed query strings) rather than by the engine.
#[derive(Debug)]
struct BadRequest(String);

impl std::fmt::Display for BadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequest {}

// ---------------------------------------------------------------------------
// AppError: one error type for every HTTP response
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequest(msg.into()).into())
    }
}

fn status_for(e: &FolioError) -> StatusCode {
    match e {
        FolioError::NotInitialized
        | FolioError::Validation(_)
        | FolioError::UnsupportedActionType(_)
        | FolioError::InvalidStatus(_)
        | FolioError::InvalidTriggerType(_)
        | FolioError::InvalidId(_)
        | FolioError::Json(_) => StatusCode::BAD_REQUEST,
        FolioError::Forbidden(_) => StatusCode::FORBIDDEN,
        FolioError::NotFound(_) => StatusCode::NOT_FOUND,
        FolioError::Conflict { .. } | FolioError::RetriesExhausted { .. } => StatusCode::CONFLICT,
        FolioError::LockUnavailable { .. } => StatusCode::LOCKED,
        FolioError::UpstreamDispatchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        FolioError::TriggeredAction { .. }
        | FolioError::Broker(_)
        | FolioError::Db(_)
        | FolioError::Io(_)
        | FolioError::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequest>() {
            let body = serde_json::json!({ "error": b.0.clone(), "kind": "bad_request" });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let Some(e) = self.0.downcast_ref::<FolioError>() else {
            tracing::error!(error = %self.0, "unhandled server error");
            let body = serde_json::json!({ "error": self.0.to_string(), "kind": "internal" });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let status = status_for(e);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %e, kind = e.kind(), "request failed");
        }
        let mut body = serde_json::json!({ "error": e.to_string(), "kind": e.kind() });
        if e.is_retryable() {
            body["retryable"] = serde_json::Value::Bool(true);
        }
        match e {
            FolioError::TriggeredAction { failures, .. } => {
                body["failures"] = serde_json::json!(failures);
            }
            FolioError::LockUnavailable { keys } => {
                body["keys"] = serde_json::json!(keys);
            }
            _ => {}
        }
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
