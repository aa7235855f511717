//! Instrumented in-process engine shared by the integration tests.

#![allow(dead_code)]

use ppt_export_server::engine::{Document, Engine, EngineError, EngineFactory};
use ppt_export_server::options::{ExportConfiguration, OpenOptions};
use ppt_export_server::resource::ResourceManager;
use ppt_export_server::service::ConversionService;
use ppt_export_server::workspace::WorkspaceManager;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Smallest document the fake engine accepts: a ZIP local file header.
pub const MINIMAL_DECK: &[u8] = b"PK\x03\x04\x14\x00\x00\x00minimal-deck";

const FAKE_PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

/// Counters observed by the tests.
#[derive(Default)]
pub struct Tally {
    pub launches: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub quits: AtomicUsize,
    pub in_session: AtomicUsize,
    pub max_in_session: AtomicUsize,
    pub fail_next_export: AtomicBool,
    pub export_delay_ms: AtomicU64,
}

impl Tally {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    tally: Arc<Tally>,
}

impl Engine for FakeEngine {
    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Box<dyn Document>, EngineError> {
        assert!(options.read_only.is_true());
        assert!(!options.with_window.is_true());

        let data = std::fs::read(path)?;
        if !data.starts_with(b"PK") {
            return Err(EngineError::Open {
                path: path.to_path_buf(),
                reason: "not a presentation".to_string(),
            });
        }

        let now = self.tally.in_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.tally.max_in_session.fetch_max(now, Ordering::SeqCst);
        self.tally.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeDocument {
            tally: self.tally.clone(),
        }))
    }

    fn quit(&self) -> Result<(), EngineError> {
        self.tally.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeDocument {
    tally: Arc<Tally>,
}

impl Document for FakeDocument {
    fn export(&mut self, path: &Path, _config: &ExportConfiguration) -> Result<(), EngineError> {
        let delay = self.tally.export_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.tally.fail_next_export.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Export("renderer crashed".to_string()));
        }
        std::fs::write(path, FAKE_PDF)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.tally.in_session.fetch_sub(1, Ordering::SeqCst);
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fake_factory(tally: Arc<Tally>) -> EngineFactory {
    Arc::new(move || {
        tally.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine {
            tally: tally.clone(),
        }) as Arc<dyn Engine>)
    })
}

pub fn fake_service(root: &TempDir, tally: Arc<Tally>) -> ConversionService {
    ConversionService::new(
        Arc::new(ResourceManager::new(fake_factory(tally))),
        WorkspaceManager::new(root.path()),
        ExportConfiguration::default(),
    )
}

/// Entries left under the workspace root.
pub fn residue(root: &TempDir) -> usize {
    std::fs::read_dir(root.path()).map(|dir| dir.count()).unwrap_or(0)
}
