use folio_core::config::Config;
use folio_core::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(root: PathBuf, engine: Arc<Engine>) -> Self {
        Self { root, engine }
    }

    /// Load `.folio/config.yaml` under `root` and open the configured backend.
    pub fn open(root: &Path) -> folio_core::Result<Self> {
        let config = Config::load(root)?;
        let engine = Engine::open(root, config)?;
        Ok(Self::new(root.to_path_buf(), Arc::new(engine)))
    }
}
