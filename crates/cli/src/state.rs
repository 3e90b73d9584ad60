use std::path::Path;
use std::sync::Arc;

use gridforge_core::{Config, JobStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    /// Directory holding every album; served as static files.
    pub fn output_dir(&self) -> &Path {
        &self.config.output.dir
    }
}
