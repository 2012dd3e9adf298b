//! Per-request working directories.
//!
//! [`WorkspaceManager::acquire`] creates a uniquely named directory under the
//! configured root. The returned [`Workspace`] owns it: calling
//! [`Workspace::release`] or dropping the value (including while unwinding)
//! deletes the directory exactly once.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use pf_core::TargetFormat;

/// Directory name prefix under the workspace root.
const WORKSPACE_PREFIX: &str = "pixforge-";

/// Creates workspaces under a shared root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory workspaces are created in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub fn ensure_root(&self) -> pf_core::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Allocate a fresh, empty workspace directory.
    pub fn acquire(&self) -> pf_core::Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)?;
        tracing::debug!("Acquired workspace {}", dir.path().display());
        Ok(Workspace { dir: Some(dir) })
    }
}

/// An exclusively owned working directory for one conversion.
///
/// # Example
///
/// ```no_run
/// use pf_magick::WorkspaceManager;
///
/// # async fn example() -> pf_core::Result<()> {
/// let manager = WorkspaceManager::new(std::env::temp_dir());
/// let workspace = manager.acquire()?;
/// let input = workspace.stage(".png", b"...").await?;
/// // ... run the engine against `input` ...
/// workspace.release();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Workspace {
    // `None` once released.
    dir: Option<TempDir>,
}

impl Workspace {
    /// Path to the workspace directory.
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Where the upload is written, e.g. `input.png`.
    pub fn input_path(&self, extension: &str) -> PathBuf {
        self.path().join(format!("input{extension}"))
    }

    /// Where the engine writes its result, e.g. `output.avif`.
    pub fn output_path(&self, format: TargetFormat) -> PathBuf {
        self.path().join(format!("output.{format}"))
    }

    /// Write the uploaded bytes to the input file and return its path.
    pub async fn stage(&self, extension: &str, bytes: &[u8]) -> pf_core::Result<PathBuf> {
        let input = self.input_path(extension);
        tokio::fs::write(&input, bytes).await?;
        Ok(input)
    }

    /// Delete the directory now.
    ///
    /// A directory that is already gone is logged and otherwise ignored.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => tracing::debug!("Released workspace {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Workspace {} was already removed", path.display());
            }
            Err(e) => {
                tracing::error!("Failed to remove workspace {}: {e}", path.display());
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}
