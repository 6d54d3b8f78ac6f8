//! Test harness for isolated import runs.
//!
//! Every harness owns a temp directory holding the SQLite database and the
//! object store root, so tests never share state.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use walkdir::WalkDir;

use galleria::db::{artifact_repo, gallery_repo};
use galleria::model::{Artifact, Gallery};
use galleria::processor::{ConverterRegistry, PageRenderer};
use galleria::storage::{LocalObjectStore, ObjectStore};
use galleria::{
    load_config_from_str, Database, ImportConfig, ImportRequest, ImportService, JobStatusView,
    ProcessError,
};

use super::source::FakeSource;

pub const GALLERY_ID: &str = "gallery-1";
pub const COURSE_ID: &str = "course-1";
pub const ASSIGNMENT_ID: &str = "assignment-1";
pub const INITIATOR: &str = "instructor@school.example.com";

/// PNG bytes of a solid-colour image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 90, 160]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode PNG");
    buffer.into_inner()
}

/// Renders a fixed number of pages per document without poppler.
pub struct FixedPageRenderer {
    pub pages: u32,
}

impl PageRenderer for FixedPageRenderer {
    fn page_count(&self, _pdf: &[u8]) -> Result<u32, ProcessError> {
        Ok(self.pages)
    }

    fn render(&self, _pdf: &[u8], last_page: u32, _dpi: u32) -> Result<Vec<Vec<u8>>, ProcessError> {
        Ok((0..last_page).map(|_| png_bytes(100, 140)).collect())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: ImportConfig,
    pub db: Database,
    pub store: Arc<LocalObjectStore>,
    pub source: Arc<FakeSource>,
    pub service: ImportService,
}

impl TestHarness {
    /// Work units run in-process before `start_import` returns.
    pub fn inline(source: FakeSource) -> Self {
        Self::with_dispatch(source, json!({ "mode": "inline" }))
    }

    /// Work units go through the local threaded queue.
    pub fn queued(source: FakeSource, stagger_ms: u64) -> Self {
        Self::with_dispatch(
            source,
            json!({
                "mode": "queued",
                "staggerMs": stagger_ms,
                "workerCount": 1,
                "maxAttempts": 2
            }),
        )
    }

    fn with_dispatch(source: FakeSource, dispatch: Value) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let raw = json!({
            "version": "1.0",
            "databasePath": temp_dir.path().join("galleria.db"),
            "storage": {
                "root": temp_dir.path().join("objects"),
                "publicBaseUrl": "https://cdn.example.com"
            },
            "source": {},
            "dispatch": dispatch
        });
        let config = load_config_from_str(&raw.to_string()).expect("Invalid test config");

        let db = Database::open(&config.database_path).expect("Failed to open database");
        let store = Arc::new(LocalObjectStore::new(
            &config.storage.root,
            &config.storage.public_base_url,
        ));
        let source = Arc::new(source);
        let registry = ConverterRegistry::with_renderer(
            &config.conversion,
            Arc::new(FixedPageRenderer { pages: 4 }),
        );
        let service = ImportService::build(
            &config,
            db.clone(),
            store.clone(),
            source.clone(),
            registry,
        )
        .expect("Failed to build import service");

        Self {
            temp_dir,
            config,
            db,
            store,
            source,
            service,
        }
    }

    pub fn request() -> ImportRequest {
        ImportRequest::new(GALLERY_ID, COURSE_ID, ASSIGNMENT_ID, INITIATOR)
    }

    /// Starts an import and waits for a terminal status.
    pub async fn import(&self) -> JobStatusView {
        let job_id = self
            .service
            .start_import(&Self::request())
            .await
            .expect("start_import failed");
        self.service
            .wait_for_job(&job_id, Duration::from_secs(20))
            .await
            .expect("job status unavailable")
    }

    pub fn gallery(&self) -> Gallery {
        gallery_repo::find_by_id(&self.db, GALLERY_ID)
            .expect("gallery lookup failed")
            .expect("gallery missing")
    }

    pub fn artifacts(&self, job_id: &str) -> Vec<Artifact> {
        artifact_repo::find_by_imported_by(&self.db, job_id).expect("artifact lookup failed")
    }

    pub fn object_exists(&self, path: &str) -> bool {
        self.store.get(path).is_ok()
    }

    /// Files left under the staging prefix.
    pub fn staged_files(&self) -> usize {
        let staging = self.config.storage.root.join(&self.config.storage.staging_prefix);
        WalkDir::new(staging)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }
}
