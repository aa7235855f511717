//! Document engine capability.
//!
//! The engine is an external, single-instance application. Nothing here is
//! safe to call concurrently against one handle; callers go through
//! [`crate::resource::ResourceManager`] to get exclusive access.

pub mod soffice;

use crate::options::{ExportConfiguration, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use soffice::{SofficeConfig, SofficeEngine};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch document engine: {0}")]
    Launch(String),

    #[error("engine could not open '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("{0}")]
    Export(String),

    #[error("unsupported export setting: {0}")]
    Unsupported(String),

    #[error("engine produced no output at '{0}'")]
    MissingOutput(PathBuf),

    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine task aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the failure means the engine could not load the document,
    /// wherever in the session it surfaced.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, EngineError::Open { .. })
    }
}

/// A running engine instance.
#[cfg_attr(test, mockall::automock)]
pub trait Engine: Send + Sync {
    /// Opens a document. Must not display UI or prompt.
    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Box<dyn Document>, EngineError>;

    /// Terminates the engine instance.
    fn quit(&self) -> Result<(), EngineError>;
}

/// A document opened by an [`Engine`].
#[cfg_attr(test, mockall::automock)]
pub trait Document: Send {
    fn export(&mut self, path: &Path, config: &ExportConfiguration) -> Result<(), EngineError>;

    fn close(&mut self) -> Result<(), EngineError>;
}

/// Constructs an engine instance. Called lazily, at most once per live handle.
pub type EngineFactory = Arc<dyn Fn() -> Result<Arc<dyn Engine>, EngineError> + Send + Sync>;

/// Factory launching [`SofficeEngine`] handles with the given configuration.
pub fn soffice_factory(config: SofficeConfig) -> EngineFactory {
    Arc::new(move || {
        let engine = SofficeEngine::launch(config.clone())?;
        Ok(Arc::new(engine) as Arc<dyn Engine>)
    })
}
