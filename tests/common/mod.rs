//! Shared test harness for integration tests.
//!
//! [`TestHarness`] lays out a temp directory with a `bin/` search path for
//! fake tools and a `work/` workspace root, builds the [`AppContext`], and
//! starts Axum on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pf_core::config::Config;
use pf_server::context::AppContext;
use pf_server::router::build_router;

/// Fake engine: answers `--version`, logs its arguments, and copies the
/// input (first argument) to the output (last argument).
pub const COPY_ENGINE: &str = r#"
if [ "$1" = "--version" ]; then
  echo "Version: ImageMagick 7.1.1-29 Q16-HDRI x86_64"
  exit 0
fi
echo "$@" >> "$(dirname "$0")/args.log"
for last; do :; done
cp "$1" "$last"
"#;

/// Fake engine that fails with a diagnostic on stderr.
pub const FAILING_ENGINE: &str = r#"
echo "$@" >> "$(dirname "$0")/args.log"
echo "magick: no decode delegate for this image format" >&2
exit 1
"#;

/// Fake engine that succeeds without writing anything.
pub const SILENT_ENGINE: &str = r#"
echo "$@" >> "$(dirname "$0")/args.log"
exit 0
"#;

/// Fake engine that records its pid and never finishes.
pub const HANGING_ENGINE: &str = r#"
echo $$ > "$(dirname "$0")/engine.pid"
exec sleep 30
"#;

/// Fake encoder plugin.
pub const PLUGIN: &str = r#"
echo "heif-enc libheif version: 1.17.6"
"#;

/// Test harness wrapping a running server and its scratch directories.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    root: tempfile::TempDir,
}

/// Write an executable shell script named `name` into `dir`.
pub fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}

impl TestHarness {
    /// Start a server whose engine is `engine` (and no plugin).
    pub async fn start(engine: &str) -> Self {
        Self::start_with(engine, |_| {}).await
    }

    /// Start a server after letting the caller adjust the config.
    pub async fn start_with(engine: &str, configure: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let bin = root.path().join("bin");
        let work = root.path().join("work");
        std::fs::create_dir(&bin).unwrap();
        std::fs::create_dir(&work).unwrap();
        install_script(&bin, "magick", engine);

        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.storage.temp_dir = work;
        config.tools.search_path = Some(bin.display().to_string());
        configure(&mut config);

        let ctx = AppContext::new(config);
        let app = build_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            ctx,
            addr,
            client: reqwest::Client::new(),
            root,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.path().join("bin")
    }

    /// Make `heif-enc` discoverable.
    pub fn install_plugin(&self) {
        install_script(&self.bin_dir(), "heif-enc", PLUGIN);
    }

    /// Arguments the fake engine was called with, one line per run.
    pub fn engine_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.bin_dir().join("args.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn engine_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.bin_dir().join("engine.pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Number of workspace directories currently on disk.
    pub fn workspaces_left(&self) -> usize {
        std::fs::read_dir(self.root.path().join("work"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    /// Wait until every workspace has been removed (response bodies are
    /// dropped by the server shortly after the client finishes reading).
    pub async fn wait_for_cleanup(&self) -> usize {
        for _ in 0..50 {
            if self.workspaces_left() == 0 {
                return 0;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.workspaces_left()
    }

    /// POST `bytes` as the multipart `file` field named `filename`.
    pub async fn convert(&self, path: &str, filename: &str, bytes: Vec<u8>) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }
}

/// A few bytes that stand in for an image; the fake engine only copies them.
pub fn fake_image() -> Vec<u8> {
    b"\xFF\xD8\xFF\xE0fake-jpeg-payload".to_vec()
}
