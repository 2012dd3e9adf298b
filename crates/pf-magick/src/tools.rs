//! External tool detection and management.
//!
//! The [`ToolRegistry`] locates the conversion engine (`magick`) and its
//! AV1/HEIF encoder plugin (`heif-enc`). Lookups honour explicit paths from
//! [`pf_core::config::ToolsConfig`] first, then a configured search path, then
//! `$PATH`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// The image-conversion engine.
pub const ENGINE: &str = "magick";
/// The optional AV1/HEIF encoder plugin.
pub const PLUGIN: &str = "heif-enc";

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &[ENGINE, PLUGIN];

/// Version probes must answer quickly.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `--version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool locations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    config: pf_core::config::ToolsConfig,
    tools: HashMap<&'static str, PathBuf>,
}

impl ToolRegistry {
    /// Discover the engine and plugin.
    ///
    /// Tools that are not found are omitted; [`ToolRegistry::require`] reports
    /// them when a caller actually needs one.
    pub fn discover(tools_config: &pf_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();
        for &name in KNOWN_TOOLS {
            match resolve(tools_config, name) {
                Some(path) => {
                    tracing::debug!("Found {name} at {}", path.display());
                    tools.insert(name, path);
                }
                None => tracing::debug!("{name} not found"),
            }
        }

        Self {
            config: tools_config.clone(),
            tools,
        }
    }

    /// Path of a tool found during discovery, or an [`pf_core::Error::Tool`].
    pub fn require(&self, name: &str) -> pf_core::Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| {
            pf_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Program used to invoke the engine. Falls back to the bare name so a
    /// missing engine surfaces as a spawn failure at conversion time.
    pub fn engine_program(&self) -> PathBuf {
        self.require(ENGINE)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(ENGINE))
    }

    /// Re-resolve the plugin now. The plugin may be installed or removed
    /// while the service runs, so this does not use the discovery cache.
    pub fn probe_plugin(&self) -> Option<PathBuf> {
        resolve(&self.config, PLUGIN)
    }

    /// Check all known tools and return availability information.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());
        for &name in KNOWN_TOOLS {
            let info = match resolve(&self.config, name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&path).await,
                    path: Some(path),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            };
            infos.push(info);
        }
        infos
    }
}

/// Locate `name` using an explicit path if it exists, else the search path.
fn resolve(config: &pf_core::config::ToolsConfig, name: &str) -> Option<PathBuf> {
    let custom_path = match name {
        ENGINE => config.magick_path.as_deref(),
        PLUGIN => config.heif_enc_path.as_deref(),
        _ => None,
    };

    if let Some(p) = custom_path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        tracing::warn!("Configured path {} for {name} does not exist", p.display());
    }

    match config.search_path.as_deref() {
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in(name, Some(paths), cwd).ok()
        }
        None => which::which(name).ok(),
    }
}

/// Run `<tool> --version` and return the first non-empty line of stdout.
async fn detect_version(path: &Path) -> Option<String> {
    let output = ToolCommand::new(path.to_path_buf())
        .arg("--version")
        .timeout(VERSION_TIMEOUT)
        .execute()
        .await
        .ok()?;

    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::config::ToolsConfig;

    /// A config whose search path is an empty temp directory.
    fn isolated() -> (tempfile::TempDir, ToolsConfig) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ToolsConfig {
            search_path: Some(dir.path().display().to_string()),
            ..ToolsConfig::default()
        };
        (dir, cfg)
    }

    #[cfg(unix)]
    fn install(dir: &Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        // Nothing is guaranteed to be installed; discovery must not panic.
        let _ = registry.engine_program();
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let (_dir, cfg) = isolated();
        let registry = ToolRegistry::discover(&cfg);
        let err = registry.require(ENGINE).unwrap_err();
        assert!(err.to_string().contains("magick not found"), "{err}");
        assert_eq!(registry.engine_program(), PathBuf::from("magick"));
    }

    #[cfg(unix)]
    #[test]
    fn search_path_is_used() {
        let (dir, cfg) = isolated();
        let fake = install(dir.path(), ENGINE, "exit 0");
        let registry = ToolRegistry::discover(&cfg);
        assert_eq!(registry.require(ENGINE).unwrap(), fake.as_path());
        assert!(registry.probe_plugin().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn explicit_path_wins_over_search_path() {
        let (dir, mut cfg) = isolated();
        install(dir.path(), ENGINE, "exit 0");
        let other = tempfile::tempdir().unwrap();
        let explicit = install(other.path(), "my-magick", "exit 0");
        cfg.magick_path = Some(explicit.clone());

        let registry = ToolRegistry::discover(&cfg);
        assert_eq!(registry.require(ENGINE).unwrap(), explicit.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn plugin_probe_sees_late_install() {
        let (dir, cfg) = isolated();
        let registry = ToolRegistry::discover(&cfg);
        assert!(registry.probe_plugin().is_none());

        let plugin = install(dir.path(), PLUGIN, "exit 0");
        assert_eq!(registry.probe_plugin(), Some(plugin));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_all_reports_versions() {
        let (dir, cfg) = isolated();
        install(
            dir.path(),
            ENGINE,
            "echo 'Version: ImageMagick 7.1.1-29 Q16-HDRI x86_64'",
        );
        let registry = ToolRegistry::discover(&cfg);

        let infos = registry.check_all().await;
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["magick", "heif-enc"]);

        assert!(infos[0].available);
        assert_eq!(
            infos[0].version.as_deref(),
            Some("Version: ImageMagick 7.1.1-29 Q16-HDRI x86_64")
        );
        assert!(!infos[1].available);
        assert!(infos[1].path.is_none());
    }

    #[test]
    fn tool_info_serialization() {
        let info = ToolInfo {
            name: "magick".to_string(),
            available: true,
            version: Some("7.1".into()),
            path: Some(PathBuf::from("/usr/bin/magick")),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("/usr/bin/magick"));
    }
}
