//! Per-request staging directories.
//!
//! A [`Workspace`] owns a uniquely named directory under the manager's root.
//! The directory is removed by [`Workspace::destroy`] or, failing an explicit
//! call, when the workspace is dropped, so every exit path (early return,
//! error, panic unwinding, task cancellation) cleans up.

use crate::error::ConvertError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

const WORKSPACE_PREFIX: &str = "workspace-";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates an isolated directory for one request.
    pub fn create(&self) -> Result<Workspace, ConvertError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            ConvertError::staging(
                format!("failed to create workspace root {}", self.root.display()),
                e,
            )
        })?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| ConvertError::staging("failed to create workspace", e))?;

        debug!(workspace = %dir.path().display(), "Workspace created");

        Ok(Workspace {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            token: Uuid::new_v4().simple().to_string(),
            input: None,
            output: None,
        })
    }
}

/// Staging directory with an input and an output slot.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    /// Random stem shared by the staged files; never derived from user input.
    token: String,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    /// Writes the uploaded bytes to `<token>.<extension>`.
    pub async fn write_input(
        &mut self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<PathBuf, ConvertError> {
        let path = self.path.join(format!("{}.{}", self.token, extension));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConvertError::staging("failed to write input", e))?;

        self.input = Some(path.clone());
        Ok(path)
    }

    /// Reserves `<token>.<extension>` for the engine's output.
    pub fn output_path(&mut self, extension: &str) -> PathBuf {
        let path = self.path.join(format!("{}.{}", self.token, extension));
        self.output = Some(path.clone());
        path
    }

    pub async fn read_output(&self) -> Result<Vec<u8>, ConvertError> {
        let path = self.output.as_deref().ok_or_else(|| {
            ConvertError::staging(
                "no output reserved",
                std::io::Error::new(std::io::ErrorKind::NotFound, "output slot empty"),
            )
        })?;

        tokio::fs::read(path)
            .await
            .map_err(|e| ConvertError::staging("failed to read output", e))
    }

    /// Removes the directory. Safe to call more than once.
    pub fn destroy(&mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                dir.close()?;
                debug!(workspace = %self.path.display(), "Workspace removed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(
                workspace = %self.path.display(),
                error = %e,
                "Failed to remove workspace"
            );
        }
    }
}
