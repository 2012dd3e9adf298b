//! Service configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, limits, storage, and tool sections. Every section defaults sensibly
//! so a completely empty `{}` file is valid. A handful of environment
//! variables override the file (see [`Config::apply_env_overrides`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable overriding [`StorageConfig::temp_dir`].
pub const ENV_TEMP_DIR: &str = "TEMP_DIR";
/// Environment variable overriding [`LimitsConfig::max_upload_mb`].
pub const ENV_MAX_FILE_SIZE_MB: &str = "MAX_FILE_SIZE_MB";
/// Environment variable overriding [`LimitsConfig::timeout_secs`].
pub const ENV_TIMEOUT_SECONDS: &str = "TIMEOUT_SECONDS";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `TEMP_DIR`, `MAX_FILE_SIZE_MB` and `TIMEOUT_SECONDS` from the
    /// process environment. Unparseable numbers are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os(ENV_TEMP_DIR).filter(|v| !v.is_empty()) {
            self.storage.temp_dir = PathBuf::from(dir);
        }
        if let Some(mb) = env_u64(ENV_MAX_FILE_SIZE_MB) {
            self.limits.max_upload_mb = mb;
        }
        if let Some(secs) = env_u64(ENV_TIMEOUT_SECONDS) {
            self.limits.timeout_secs = secs;
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }
        if self.limits.max_upload_mb == 0 {
            warnings.push("limits.max_upload_mb is 0; every non-empty upload will be rejected".into());
        }
        if self.limits.timeout_secs == 0 {
            warnings.push("limits.timeout_secs is 0; every conversion will time out".into());
        }
        if self.limits.diagnostic_bytes == 0 {
            warnings.push("limits.diagnostic_bytes is 0; encoder errors will carry no detail".into());
        }
        if self.storage.temp_dir.as_os_str().is_empty() {
            warnings.push("storage.temp_dir is empty".into());
        }
        if let Some(ref p) = self.tools.magick_path {
            if !p.exists() {
                warnings.push(format!(
                    "tools.magick_path {} does not exist; falling back to search path",
                    p.display()
                ));
            }
        }

        warnings
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {name}={raw:?}: not a non-negative integer");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Resource limits applied to every conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upload ceiling in MiB.
    pub max_upload_mb: u64,
    /// Wall-clock limit for one engine invocation.
    pub timeout_secs: u64,
    /// How much of the engine's stdout/stderr is kept for diagnostics.
    pub diagnostic_bytes: usize,
}

impl LimitsConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: 200,
            timeout_secs: 300,
            diagnostic_bytes: 1000,
        }
    }
}

/// Where per-request workspaces are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Locations of the external engine and its encoder plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Explicit path to `magick`; searched for when unset or missing.
    pub magick_path: Option<PathBuf>,
    /// Explicit path to `heif-enc`; searched for when unset or missing.
    pub heif_enc_path: Option<PathBuf>,
    /// `PATH`-style list of directories to search instead of `$PATH`.
    pub search_path: Option<String>,
}
