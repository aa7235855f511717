//! LibreOffice-backed engine.
//!
//! Each handle owns a private user profile so that concurrent service
//! instances on one host never share LibreOffice's profile lock. Exports run
//! `soffice --headless --convert-to` against that profile with a hard
//! process timeout.

use super::{Document, Engine, EngineError};
use crate::options::{
    ExportConfiguration, FixedFormatIntent, FixedFormatType, OpenOptions, OutputType, RangeType,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// ZIP local file header (OOXML and ODF packages).
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// OLE2 compound file header (legacy binary presentations).
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const OOXML_PRESENTATION_PART: &str = "ppt/presentation.xml";
const ODF_CONTENT_PART: &str = "content.xml";
const ODF_MIMETYPE_PART: &str = "mimetype";
const ODF_PRESENTATION_MIMETYPE: &str = "application/vnd.oasis.opendocument.presentation";

/// Printed by soffice when the import filter gives up on the source.
const LOAD_FAILURE_MARKER: &str = "source file could not be loaded";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Screen-intent exports downsample images to this resolution.
const SCREEN_MAX_DPI: u32 = 150;

const EXPORT_LOG: &str = "soffice.log";

#[derive(Debug, Clone)]
pub struct SofficeConfig {
    /// Path or name of the `soffice` executable.
    pub program: PathBuf,
    /// Upper bound for a single `--convert-to` run.
    pub export_timeout: Duration,
}

impl Default for SofficeConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("soffice"),
            export_timeout: Duration::from_secs(240),
        }
    }
}

pub struct SofficeEngine {
    config: SofficeConfig,
    profile_url: String,
    /// `None` once the engine has quit.
    profile: Mutex<Option<TempDir>>,
}

impl SofficeEngine {
    /// Verifies the executable runs and creates the private profile.
    pub fn launch(config: SofficeConfig) -> Result<Self, EngineError> {
        let output = Command::new(&config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                EngineError::Launch(format!("{}: {}", config.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(EngineError::Launch(format!(
                "{} --version exited with {}",
                config.program.display(),
                output.status
            )));
        }

        let profile = tempfile::Builder::new()
            .prefix("soffice-profile-")
            .tempdir()
            .map_err(|e| EngineError::Launch(format!("failed to create profile: {}", e)))?;

        info!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            profile = %profile.path().display(),
            "Document engine launched"
        );

        Ok(Self::with_profile(config, profile))
    }

    fn with_profile(config: SofficeConfig, profile: TempDir) -> Self {
        Self {
            profile_url: file_url(profile.path()),
            config,
            profile: Mutex::new(Some(profile)),
        }
    }
}

impl Engine for SofficeEngine {
    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Box<dyn Document>, EngineError> {
        if options.with_window.is_true() {
            return Err(EngineError::Unsupported(
                "soffice runs headless; with_window must be false".to_string(),
            ));
        }
        if self.profile.lock().is_none() {
            return Err(EngineError::Aborted("engine has quit".to_string()));
        }

        check_container(path)?;
        debug!(path = %path.display(), "Document opened");

        Ok(Box::new(SofficeDocument {
            config: self.config.clone(),
            profile_url: self.profile_url.clone(),
            source: path.to_path_buf(),
            closed: false,
        }))
    }

    fn quit(&self) -> Result<(), EngineError> {
        if let Some(profile) = self.profile.lock().take() {
            let path = profile.path().to_path_buf();
            profile.close()?;
            info!(profile = %path.display(), "Document engine quit");
        }
        Ok(())
    }
}

struct SofficeDocument {
    config: SofficeConfig,
    profile_url: String,
    source: PathBuf,
    closed: bool,
}

impl Document for SofficeDocument {
    fn export(&mut self, path: &Path, config: &ExportConfiguration) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Export("document is closed".to_string()));
        }

        let filter = filter_options(config)?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let export_dir = tempfile::Builder::new()
            .prefix("export-")
            .tempdir_in(parent)?;
        let log_path = export_dir.path().join(EXPORT_LOG);
        let log = File::create(&log_path)?;

        let mut child = Command::new(&self.config.program)
            .arg(format!("-env:UserInstallation={}", self.profile_url))
            .args([
                "--headless",
                "--invisible",
                "--nologo",
                "--nodefault",
                "--nolockcheck",
                "--norestore",
                "--convert-to",
            ])
            .arg(&filter)
            .arg("--outdir")
            .arg(export_dir.path())
            .arg(&self.source)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.config.export_timeout {
                warn!(source = %self.source.display(), "soffice export timed out, killing process");
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Timeout(self.config.export_timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let log_text = fs::read_to_string(&log_path).unwrap_or_default();
        if reports_load_failure(&log_text) {
            return Err(EngineError::Open {
                path: self.source.clone(),
                reason: log_text.trim().to_string(),
            });
        }
        if !status.success() {
            return Err(EngineError::Export(format!(
                "soffice exited with {}: {}",
                status,
                log_text.trim()
            )));
        }

        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let produced = export_dir
            .path()
            .join(format!("{}.{}", stem, FixedFormatType::Pdf.extension()));
        if !produced.exists() {
            return Err(EngineError::Export(format!(
                "soffice wrote no output: {}",
                log_text.trim()
            )));
        }

        fs::rename(&produced, path)?;
        debug!(
            output = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "soffice export finished"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        Ok(())
    }
}

/// Checks the file is a non-empty presentation container. ZIP packages must
/// have a readable central directory holding a presentation part.
fn check_container(path: &Path) -> Result<(), EngineError> {
    let rejected = |reason: String| EngineError::Open {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| rejected(e.to_string()))?;
    let mut header = Vec::with_capacity(OLE_MAGIC.len());
    (&file)
        .take(OLE_MAGIC.len() as u64)
        .read_to_end(&mut header)
        .map_err(|e| rejected(e.to_string()))?;

    if header.is_empty() {
        return Err(rejected("document is empty".to_string()));
    }
    if header == OLE_MAGIC {
        return Ok(());
    }
    if !header.starts_with(ZIP_MAGIC) {
        return Err(rejected("not a recognised presentation container".to_string()));
    }

    let mut archive = ZipArchive::new(file)
        .map_err(|e| rejected(format!("corrupt package: {}", e)))?;
    if archive.index_for_name(OOXML_PRESENTATION_PART).is_some() {
        return Ok(());
    }
    if archive.index_for_name(ODF_CONTENT_PART).is_some() {
        let mut mimetype = String::new();
        if let Ok(mut entry) = archive.by_name(ODF_MIMETYPE_PART) {
            entry
                .read_to_string(&mut mimetype)
                .map_err(|e| rejected(format!("corrupt package: {}", e)))?;
        }
        if mimetype.trim().starts_with(ODF_PRESENTATION_MIMETYPE) {
            return Ok(());
        }
    }
    Err(rejected("package holds no presentation".to_string()))
}

/// Whether soffice's output says it could not load the source document.
fn reports_load_failure(log: &str) -> bool {
    log.to_ascii_lowercase().contains(LOAD_FAILURE_MARKER)
}

/// Builds the `--convert-to` argument for the Impress PDF export filter.
pub fn filter_options(config: &ExportConfiguration) -> Result<String, EngineError> {
    if config.fixed_format_type != FixedFormatType::Pdf {
        return Err(EngineError::Unsupported(format!(
            "{} output",
            config.fixed_format_type
        )));
    }
    if config.output_type.is_handout() || config.output_type == OutputType::Outline {
        return Err(EngineError::Unsupported(format!(
            "output type {:?}",
            config.output_type
        )));
    }

    let mut data = Map::new();
    data.insert("ExportHiddenSlides".into(), boolean(config.print_hidden_slides));
    data.insert("UseTaggedPDF".into(), boolean(config.doc_structure_tags));
    data.insert("ExportNotes".into(), boolean(config.include_markup));

    if config.output_type == OutputType::NotesPages {
        data.insert("ExportNotesPages".into(), boolean(true));
        data.insert("ExportOnlyNotesPages".into(), boolean(true));
    }
    if config.use_iso19005_1 {
        data.insert("SelectPdfVersion".into(), long(1));
    }

    match config.intent {
        FixedFormatIntent::Screen => {
            data.insert("ReduceImageResolution".into(), boolean(true));
            data.insert("MaxImageResolution".into(), long(SCREEN_MAX_DPI));
        }
        FixedFormatIntent::Print => {
            data.insert("ReduceImageResolution".into(), boolean(false));
        }
    }

    match config.range_type {
        RangeType::All => {}
        RangeType::SlideRange => {
            let range = config.print_range.ok_or_else(|| {
                EngineError::Unsupported("slide_range without print_range".to_string())
            })?;
            data.insert(
                "PageRange".into(),
                string(&format!("{}-{}", range.start, range.end)),
            );
        }
        other => {
            return Err(EngineError::Unsupported(format!("range type {:?}", other)));
        }
    }

    Ok(format!(
        "pdf:impress_pdf_Export:{}",
        Value::Object(data)
    ))
}

fn boolean(value: bool) -> Value {
    json!({ "type": "boolean", "value": value.to_string() })
}

fn long(value: u32) -> Value {
    json!({ "type": "long", "value": value.to_string() })
}

fn string(value: &str) -> Value {
    json!({ "type": "string", "value": value })
}

fn file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}
