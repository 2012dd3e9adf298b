//! Application context shared across route handlers via Axum state.

use std::sync::Arc;

use pf_core::config::Config;
use pf_magick::{Converter, ToolRegistry};

/// Immutable infrastructure for the HTTP layer. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    /// Effective configuration (file, env overrides and CLI flags applied).
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Conversion orchestrator.
    pub converter: Arc<Converter>,
}

impl AppContext {
    /// Discover tools and build the converter for `config`.
    pub fn new(config: Config) -> Self {
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let converter = Arc::new(Converter::new(&config, Arc::clone(&tools)));
        Self {
            config: Arc::new(config),
            tools,
            converter,
        }
    }

    /// Upload ceiling in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.config.limits.max_upload_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_uses_configured_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.temp_dir = dir.path().to_path_buf();
        config.limits.max_upload_mb = 3;

        let ctx = AppContext::new(config);
        assert_eq!(ctx.converter.workspaces().root(), dir.path());
        assert_eq!(ctx.max_upload_bytes(), 3 * 1024 * 1024);
    }
}
