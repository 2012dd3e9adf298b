//! Request orchestration: validate, stage, plan, execute.
//!
//! [`Converter::convert`] owns the workspace for the whole request. On failure
//! the workspace is released before the error is returned; on success it is
//! handed to the caller inside [`ConvertedImage`] and released when that value
//! is dropped (typically after the response body has been sent).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use pf_core::config::Config;
use pf_core::{check_upload_size, ConversionRequest, TargetFormat};

use crate::executor::{ConversionExecutor, ExecutionResult};
use crate::plan::EncodingPlan;
use crate::tools::{ToolRegistry, PLUGIN};
use crate::workspace::{Workspace, WorkspaceManager};

/// Message returned when avif/heif is requested without the plugin.
pub const PLUGIN_UNAVAILABLE: &str =
    "AVIF/HEIF encoding is not available. heif-enc encoder not found.";

/// The steps of a conversion that touch the outside world.
///
/// The default [`Engine::stage`] writes the upload into the workspace;
/// implementations only have to run a plan.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Write the upload into the workspace and return the input path.
    /// The upload buffer is consumed so it is freed before the engine runs.
    async fn stage(
        &self,
        workspace: &Workspace,
        extension: &str,
        source: Bytes,
    ) -> pf_core::Result<PathBuf> {
        workspace.stage(extension, &source).await
    }

    /// Run the engine for `plan` once.
    async fn execute(&self, plan: &EncodingPlan) -> pf_core::Result<ExecutionResult>;
}

#[async_trait]
impl Engine for ConversionExecutor {
    async fn execute(&self, plan: &EncodingPlan) -> pf_core::Result<ExecutionResult> {
        self.run(plan).await
    }
}

/// A finished conversion. Dropping it deletes the output.
#[derive(Debug)]
pub struct ConvertedImage {
    workspace: Workspace,
    output: PathBuf,
    len: u64,
    content_type: &'static str,
    download_filename: String,
}

impl ConvertedImage {
    /// Path of the encoded file inside the workspace.
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn download_filename(&self) -> &str {
        &self.download_filename
    }

    /// Give up ownership of the workspace, e.g. to a response body.
    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }

    /// Copy the result to `dest` and release the workspace.
    pub async fn persist(self, dest: &Path) -> pf_core::Result<u64> {
        let copied = tokio::fs::copy(&self.output, dest).await;
        self.workspace.release();
        Ok(copied?)
    }
}

/// Drives one conversion from validated request to encoded file.
pub struct Converter {
    tools: Arc<ToolRegistry>,
    workspaces: WorkspaceManager,
    engine: Arc<dyn Engine>,
    max_upload_mb: u64,
}

impl Converter {
    /// Build a converter that runs the discovered engine.
    pub fn new(config: &Config, tools: Arc<ToolRegistry>) -> Self {
        let executor = ConversionExecutor::new(
            tools.engine_program(),
            config.limits.timeout(),
            config.limits.diagnostic_bytes,
        );
        Self {
            tools,
            workspaces: WorkspaceManager::new(&config.storage.temp_dir),
            engine: Arc::new(executor),
            max_upload_mb: config.limits.max_upload_mb,
        }
    }

    /// Replace the engine.
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_mb
    }

    /// Fail with 503 if `target` needs the plugin and it is not installed.
    pub fn check_plugin(&self, target: TargetFormat) -> pf_core::Result<()> {
        if target.requires_plugin() && self.tools.probe_plugin().is_none() {
            tracing::warn!("Rejecting {target} conversion: {PLUGIN} not found");
            return Err(pf_core::Error::dependency_unavailable(
                PLUGIN,
                PLUGIN_UNAVAILABLE,
            ));
        }
        Ok(())
    }

    /// Checks that need no workspace: size ceiling, then plugin availability.
    pub fn preflight(&self, target: TargetFormat, upload_len: u64) -> pf_core::Result<()> {
        check_upload_size(upload_len, self.max_upload_mb)?;
        self.check_plugin(target)
    }

    /// Convert `request`, returning the encoded image.
    pub async fn convert(&self, request: ConversionRequest) -> pf_core::Result<ConvertedImage> {
        self.preflight(request.target(), request.source_bytes().len() as u64)?;

        let mut request = request;
        let workspace = self.workspaces.acquire()?;
        match self.convert_in(&workspace, &mut request).await {
            Ok((output, len)) => {
                tracing::info!(
                    "Converted {} to {} ({} bytes)",
                    request.source_filename(),
                    request.target(),
                    len
                );
                Ok(ConvertedImage {
                    workspace,
                    output,
                    len,
                    content_type: request.target().content_type(),
                    download_filename: request.download_filename(),
                })
            }
            Err(e) => {
                workspace.release();
                Err(e)
            }
        }
    }

    async fn convert_in(
        &self,
        workspace: &Workspace,
        request: &mut ConversionRequest,
    ) -> pf_core::Result<(PathBuf, u64)> {
        let source = request.take_source();
        let input = self
            .engine
            .stage(workspace, request.source_extension(), source)
            .await?;

        let plan = EncodingPlan::new(
            input,
            workspace.output_path(request.target()),
            request.target(),
            request.mode(),
            request.setting(),
        );

        self.engine.execute(&plan).await?.into_result()?;

        let len = tokio::fs::metadata(plan.output()).await?.len();
        Ok((plan.output().to_path_buf(), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::config::Config;
    use pf_core::{ConversionMode, Error, Setting};
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Fault {
        None,
        Stage,
        Execute,
        ExitCode,
        NoOutput,
        TimedOut,
        Panic,
    }

    struct MockEngine {
        fault: Fault,
        /// A second handle on the upload, to see when the request drops it.
        upload: Option<Bytes>,
        upload_freed: std::sync::Mutex<Option<bool>>,
    }

    impl MockEngine {
        fn new(fault: Fault) -> Self {
            Self {
                fault,
                upload: None,
                upload_freed: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Engine for MockEngine {
        async fn stage(
            &self,
            workspace: &Workspace,
            extension: &str,
            source: Bytes,
        ) -> pf_core::Result<PathBuf> {
            if self.fault == Fault::Stage {
                return Err(Error::Io {
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            workspace.stage(extension, &source).await
        }

        async fn execute(&self, plan: &EncodingPlan) -> pf_core::Result<ExecutionResult> {
            let mut result = ExecutionResult {
                exit_code: Some(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
                timed_out: false,
                output_exists: true,
                timeout: Duration::from_secs(1),
            };
            if let Some(upload) = &self.upload {
                *self.upload_freed.lock().unwrap() = Some(upload.is_unique());
            }
            match self.fault {
                Fault::Execute => return Err(Error::tool("magick", "failed to spawn")),
                Fault::Panic => panic!("engine blew up"),
                Fault::ExitCode => {
                    result.exit_code = Some(1);
                    result.stderr = b"corrupt image".to_vec();
                }
                Fault::NoOutput => result.output_exists = false,
                Fault::TimedOut => {
                    result.exit_code = None;
                    result.timed_out = true;
                }
                Fault::None | Fault::Stage => {
                    tokio::fs::write(plan.output(), b"encoded").await?;
                }
            }
            Ok(result)
        }
    }

    struct Fixture {
        root: tempfile::TempDir,
        converter: Converter,
    }

    fn fixture(fault: Fault) -> Fixture {
        fixture_with(Arc::new(MockEngine::new(fault)))
    }

    fn fixture_with(engine: Arc<MockEngine>) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let tools_dir = root.path().join("bin");
        std::fs::create_dir(&tools_dir).unwrap();
        let work = root.path().join("work");
        std::fs::create_dir(&work).unwrap();

        let mut config = Config::default();
        config.storage.temp_dir = work;
        config.limits.max_upload_mb = 1;
        config.tools.search_path = Some(tools_dir.display().to_string());

        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let converter = Converter::new(&config, tools).with_engine(engine);
        Fixture { root, converter }
    }

    impl Fixture {
        fn workspaces_left(&self) -> usize {
            std::fs::read_dir(self.root.path().join("work"))
                .unwrap()
                .count()
        }
    }

    fn request(target: TargetFormat, len: usize) -> ConversionRequest {
        ConversionRequest::new(
            target,
            ConversionMode::Lossy,
            Setting::new(80).unwrap(),
            "photo.jpg",
            Bytes::from(vec![0u8; len]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn success_hands_workspace_to_caller() {
        let f = fixture(Fault::None);
        let image = f.converter.convert(request(TargetFormat::Jpeg, 16)).await.unwrap();

        assert_eq!(image.len(), 7);
        assert_eq!(image.content_type(), "image/jpeg");
        assert_eq!(image.download_filename(), "photo_lossy_80.jpeg");
        assert_eq!(f.workspaces_left(), 1);

        drop(image);
        assert_eq!(f.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn upload_buffer_is_freed_before_engine_runs() {
        let upload = Bytes::from(vec![7u8; 4096]);
        let engine = Arc::new(MockEngine {
            upload: Some(upload.clone()),
            ..MockEngine::new(Fault::None)
        });
        let f = fixture_with(Arc::clone(&engine));

        let request = ConversionRequest::new(
            TargetFormat::Png,
            ConversionMode::Lossless,
            Setting::new(50).unwrap(),
            "photo.png",
            upload,
        )
        .unwrap();
        let image = f.converter.convert(request).await.unwrap();

        assert_eq!(*engine.upload_freed.lock().unwrap(), Some(true));
        let staged = image.output().with_file_name("input.png");
        assert_eq!(std::fs::read(staged).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn persist_copies_and_releases() {
        let f = fixture(Fault::None);
        let image = f.converter.convert(request(TargetFormat::Png, 16)).await.unwrap();
        let dest = f.root.path().join("out.png");
        assert_eq!(image.persist(&dest).await.unwrap(), 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"encoded");
        assert_eq!(f.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn each_failing_step_releases_workspace() {
        let cases = [
            (Fault::Stage, 500),
            (Fault::Execute, 500),
            (Fault::ExitCode, 500),
            (Fault::NoOutput, 500),
            (Fault::TimedOut, 504),
        ];
        for (fault, status) in cases {
            let f = fixture(fault);
            let err = f
                .converter
                .convert(request(TargetFormat::Webp, 16))
                .await
                .unwrap_err();
            assert_eq!(err.http_status(), status, "{err}");
            assert_eq!(f.workspaces_left(), 0);
        }
    }

    #[tokio::test]
    async fn panic_while_converting_releases_workspace() {
        let f = fixture(Fault::Panic);
        let converter = Arc::new(f.converter);
        let task = {
            let converter = Arc::clone(&converter);
            tokio::spawn(async move { converter.convert(request(TargetFormat::Gif, 16)).await })
        };
        let join = task.await;
        assert!(join.unwrap_err().is_panic());
        let left = std::fs::read_dir(f.root.path().join("work")).unwrap().count();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn oversized_upload_never_creates_workspace() {
        let f = fixture(Fault::None);
        let err = f
            .converter
            .convert(request(TargetFormat::Jpeg, 1024 * 1024 + 1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File too large. Max size is 1MB.");
        assert_eq!(f.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn avif_without_plugin_is_unavailable() {
        let f = fixture(Fault::None);
        let err = f
            .converter
            .convert(request(TargetFormat::Avif, 16))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.to_string(), PLUGIN_UNAVAILABLE);
        assert_eq!(f.workspaces_left(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn heif_with_plugin_proceeds() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture(Fault::None);
        let plugin = f.root.path().join("bin").join(PLUGIN);
        std::fs::write(&plugin, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&plugin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let image = f.converter.convert(request(TargetFormat::Heif, 16)).await.unwrap();
        assert_eq!(image.content_type(), "image/heif");
    }
}
