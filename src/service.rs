//! Conversion pipeline: stage, acquire, open/export/close, release, read, tear down.

use crate::conversion::{suggested_name, ConversionOutput, ConversionRecord, ConversionRequest};
use crate::engine::{Document, Engine, EngineError};
use crate::error::ConvertError;
use crate::options::{ExportConfiguration, OpenOptions};
use crate::resource::{EngineLease, ResourceManager};
use crate::telemetry;
use crate::workspace::{Workspace, WorkspaceManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_STAGING_EXTENSION: &str = "pptx";

#[derive(Clone)]
pub struct ConversionService {
    resources: Arc<ResourceManager>,
    workspaces: WorkspaceManager,
    export: Arc<ExportConfiguration>,
    staging_extension: String,
    session_timeout: Option<Duration>,
}

impl ConversionService {
    pub fn new(
        resources: Arc<ResourceManager>,
        workspaces: WorkspaceManager,
        export: ExportConfiguration,
    ) -> Self {
        Self {
            resources,
            workspaces,
            export: Arc::new(export),
            staging_extension: DEFAULT_STAGING_EXTENSION.to_string(),
            session_timeout: None,
        }
    }

    /// Extension given to staged input files, e.g. `pptx`.
    pub fn with_staging_extension(mut self, extension: impl Into<String>) -> Self {
        self.staging_extension = extension.into();
        self
    }

    /// Bounds the open/export/close sequence. On expiry the engine handle is
    /// considered wedged and replaced.
    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn export_configuration(&self) -> &ExportConfiguration {
        &self.export
    }

    /// Converts one document.
    ///
    /// The pipeline runs on its own task: if the caller goes away the
    /// conversion still finishes, releases the engine and removes its
    /// workspace.
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionOutput, ConvertError> {
        let service = self.clone();
        tokio::spawn(async move { service.run(request).await })
            .await
            .map_err(|e| ConvertError::ExportFailed(EngineError::Aborted(e.to_string())))?
    }

    async fn run(&self, request: ConversionRequest) -> Result<ConversionOutput, ConvertError> {
        let mut record = ConversionRecord::new(request.filename.clone(), request.data.len() as u64);
        debug!(
            conversion_id = %record.conversion_id,
            filename = ?record.filename,
            input_bytes = record.input_bytes,
            "Conversion started"
        );

        let result = self.execute(&mut record, request).await;
        match &result {
            Ok(output) => record.mark_complete(output.data.len() as u64),
            Err(e @ ConvertError::InputRejected(_)) => record.mark_rejected(e.to_string()),
            Err(e) => record.mark_failed(e.to_string()),
        }

        telemetry::record_conversion_telemetry(&record);
        result
    }

    async fn execute(
        &self,
        record: &mut ConversionRecord,
        request: ConversionRequest,
    ) -> Result<ConversionOutput, ConvertError> {
        let mut workspace = self.workspaces.create()?;
        let result = self.convert_in(&mut workspace, record, request).await;

        // Cleanup failures are logged; they never replace the conversion result.
        if let Err(e) = workspace.destroy() {
            warn!(
                conversion_id = %record.conversion_id,
                workspace = %workspace.path().display(),
                error = %e,
                "Failed to remove workspace"
            );
        }
        result
    }

    async fn convert_in(
        &self,
        workspace: &mut Workspace,
        record: &mut ConversionRecord,
        request: ConversionRequest,
    ) -> Result<ConversionOutput, ConvertError> {
        let ConversionRequest { data, filename } = request;

        let input = workspace.write_input(&data, &self.staging_extension).await?;
        drop(data);
        let output = workspace.output_path(self.export.file_extension());

        let lease = self.resources.acquire().await?;
        record.start_converting();
        debug!(conversion_id = %record.conversion_id, "Exclusive window entered");

        self.export_exclusive(lease, input, output.clone()).await?;
        debug!(conversion_id = %record.conversion_id, "Exclusive window left");

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(ConvertError::ExportFailed(EngineError::MissingOutput(output)));
        }
        let data = workspace.read_output().await?;

        info!(
            conversion_id = %record.conversion_id,
            output_bytes = data.len(),
            "Document exported"
        );

        Ok(ConversionOutput {
            data,
            suggested_name: suggested_name(filename.as_deref(), self.export.file_extension()),
            content_type: self.export.content_type(),
        })
    }

    /// Runs the engine session on a blocking thread while the lease is held.
    async fn export_exclusive(
        &self,
        lease: EngineLease,
        input: PathBuf,
        output: PathBuf,
    ) -> Result<(), ConvertError> {
        let engine = lease.engine().clone();
        let export = self.export.clone();
        let mut session = tokio::task::spawn_blocking(move || {
            run_session(engine.as_ref(), &input, &output, &export)
        });

        let joined = match self.session_timeout {
            None => session.await,
            Some(limit) => match tokio::time::timeout(limit, &mut session).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!(timeout = ?limit, "Engine session timed out, replacing engine");
                    let wedged = lease.discard();
                    self.resources.retire(wedged, session);
                    return Err(ConvertError::ExportFailed(EngineError::Timeout(limit)));
                }
            },
        };

        match joined {
            Ok(result) => {
                lease.release();
                result
            }
            Err(e) => {
                error!(error = %e, "Engine session panicked, replacing engine");
                let broken = lease.discard();
                self.resources.retire(broken, std::future::ready(()));
                Err(ConvertError::ExportFailed(EngineError::Aborted(e.to_string())))
            }
        }
    }
}

/// Open, export and close one document. The document is closed on every
/// path once it has been opened. A load failure reported during export still
/// counts as rejected input.
fn run_session(
    engine: &dyn Engine,
    input: &Path,
    output: &Path,
    export: &ExportConfiguration,
) -> Result<(), ConvertError> {
    let document = engine
        .open(input, &OpenOptions::headless())
        .map_err(ConvertError::InputRejected)?;
    let mut document = OpenDocument(document);

    document.0.export(output, export).map_err(|e| {
        if e.is_load_failure() {
            ConvertError::InputRejected(e)
        } else {
            ConvertError::ExportFailed(e)
        }
    })
}

struct OpenDocument(Box<dyn Document>);

impl Drop for OpenDocument {
    fn drop(&mut self) {
        if let Err(e) = self.0.close() {
            warn!(error = %e, "Failed to close document");
        }
    }
}
