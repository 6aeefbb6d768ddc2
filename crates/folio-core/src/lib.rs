pub mod access;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod handler;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod participants;
pub mod paths;
pub mod scope;
pub mod stage_sync;
pub mod store;
pub mod triggers;
pub mod types;
pub mod unique;
pub mod workflow_lock;
pub mod write;

pub use document::{Action, Document};
pub use error::{FolioError, Result};
pub use orchestrator::{Engine, PostMode, PostOptions, PostResult};
