pub mod actions;
pub mod documents;
pub mod health;

use crate::error::AppError;
use axum::http::HeaderMap;
use folio_core::FolioError;

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-folio-user";

/// Acting user from [`USER_HEADER`], if present.
pub fn acting_user(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    match headers.get(USER_HEADER) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .map_err(|_| AppError::bad_request(format!("{USER_HEADER} is not valid UTF-8"))),
    }
}

/// Acting user for a mutation. Writes are never anonymous.
pub fn required_user(headers: &HeaderMap) -> Result<String, AppError> {
    acting_user(headers)?.ok_or_else(|| {
        AppError::from(FolioError::Forbidden(format!(
            "{USER_HEADER} is required for writes"
        )))
    })
}
