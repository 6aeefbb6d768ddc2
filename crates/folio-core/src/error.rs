use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One triggered action that could not be fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerFailure {
    pub action_id: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum FolioError {
    #[error("not initialized: run 'folio init'")]
    NotInitialized,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported action type: {0}")]
    UnsupportedActionType(String),

    #[error("invalid action status: {0}")]
    InvalidStatus(String),

    #[error("invalid trigger type: {0}")]
    InvalidTriggerType(String),

    #[error("invalid document id '{0}'")]
    InvalidId(String),

    #[error("revision conflict on {id}: expected {expected:?}, found {found:?}")]
    Conflict {
        id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("write conflicts persisted after {attempts} attempts: {}", ids.join(", "))]
    RetriesExhausted { attempts: u32, ids: Vec<String> },

    #[error("locked: {}", keys.join(", "))]
    LockUnavailable { keys: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{} triggered action(s) failed after {action_id}", failures.len())]
    TriggeredAction {
        action_id: String,
        failures: Vec<TriggerFailure>,
    },

    #[error("worker did not complete {action_id} within {timeout_secs}s")]
    UpstreamDispatchTimeout { action_id: String, timeout_secs: u64 },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("database error: {0}")]
    Db(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FolioError {
    /// Errors a caller may resolve by retrying the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::Conflict { .. } | Self::RetriesExhausted { .. }
        )
    }

    /// Stable snake_case name used in structured error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::Validation(_) => "validation",
            Self::UnsupportedActionType(_) => "unsupported_action_type",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTriggerType(_) => "invalid_trigger_type",
            Self::InvalidId(_) => "invalid_id",
            Self::Conflict { .. } => "conflict",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::LockUnavailable { .. } => "lock_unavailable",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::TriggeredAction { .. } => "triggered_action",
            Self::UpstreamDispatchTimeout { .. } => "upstream_dispatch_timeout",
            Self::Broker(_) => "broker",
            Self::Db(_) => "db",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;
