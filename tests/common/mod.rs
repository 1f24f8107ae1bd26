//! Shared fakes for the integration tests.
//!
//! `FakeSource` renders each page as a 1-pixel-high image whose width is the
//! page number, so `ScriptedRecognizer` can tell pages apart without any
//! real rasterisation or OCR.

#![allow(dead_code)]

use async_trait::async_trait;
use image::DynamicImage;
use ocr_ledger::{
    DocumentHandle, DocumentSource, Issue, Ledger, LedgerError, PageCountUpdate, PageRecord,
    PipelineConfig, RasterImage, RecognitionError, Recognizer, SourceAccessError, SqliteLedger,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ── Source ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    page_counts: Mutex<HashMap<String, u32>>,
    unreadable: Mutex<HashSet<String>>,
    broken_pages: Mutex<HashSet<u32>>,
    pub opens: AtomicUsize,
    pub renders: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_document(self: Arc<Self>, filename: &str, pages: u32) -> Arc<Self> {
        self.set_document(filename, pages);
        self
    }

    pub fn set_document(&self, filename: &str, pages: u32) {
        self.page_counts
            .lock()
            .unwrap()
            .insert(filename.to_string(), pages);
    }

    /// `open` fails as if the file were corrupt.
    pub fn make_unreadable(&self, filename: &str) {
        self.unreadable.lock().unwrap().insert(filename.to_string());
    }

    /// `render_page` fails for this page number in every document.
    pub fn break_page(&self, page: u32) {
        self.broken_pages.lock().unwrap().insert(page);
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn open(&self, path: &Path) -> Result<DocumentHandle, SourceAccessError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.unreadable.lock().unwrap().contains(&name) {
            return Err(SourceAccessError::Corrupt {
                path: path.to_path_buf(),
                detail: "trailer not found".into(),
            });
        }
        let count = self.page_counts.lock().unwrap().get(&name).copied();
        match count {
            Some(n) => Ok(DocumentHandle::new(path, n)),
            None => Err(SourceAccessError::FileNotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn render_page(
        &self,
        handle: &DocumentHandle,
        page: u32,
        _dpi: u32,
    ) -> Result<RasterImage, SourceAccessError> {
        handle.check_page(page)?;
        if self.broken_pages.lock().unwrap().contains(&page) {
            return Err(SourceAccessError::RenderFailed {
                page,
                detail: "bitmap allocation failed".into(),
            });
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::new_luma8(page, 1))
    }
}

// ── Recognizer ───────────────────────────────────────────────────────────────

/// What the fake service does for one page.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Return `text of page N`.
    Succeed,
    /// Raise `EmptyResponse`, as a service that refuses the page.
    Empty,
    /// Return whitespace as if it were text.
    Blank,
    /// Raise a transient error on every call.
    AlwaysFail(String),
    /// Raise a transient error for the first `n` calls, then succeed.
    FailTimes(u32),
}

#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<HashMap<u32, Behaviour>>,
    calls: Mutex<HashMap<u32, u32>>,
    latency: Mutex<Duration>,
    blocking_work: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, page: u32, behaviour: Behaviour) {
        self.script.lock().unwrap().insert(page, behaviour);
    }

    pub fn clear_script(&self) {
        self.script.lock().unwrap().clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Hold the calling thread for `work` on every call, like CPU-bound
    /// encoding would.
    pub fn set_blocking_work(&self, work: Duration) {
        *self.blocking_work.lock().unwrap() = work;
    }

    pub fn calls_for(&self, page: u32) -> u32 {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub fn page_text(page: u32) -> String {
    format!("text of page {page}")
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        image: &RasterImage,
        _prompt: &str,
    ) -> Result<String, RecognitionError> {
        let page = image.width();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(page).or_insert(0);
            *entry += 1;
            *entry
        };
        let behaviour = self
            .script
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or(Behaviour::Succeed);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let work = *self.blocking_work.lock().unwrap();
        if !work.is_zero() {
            std::thread::sleep(work);
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behaviour {
            Behaviour::Succeed => Ok(page_text(page)),
            Behaviour::Empty => Err(RecognitionError::EmptyResponse),
            Behaviour::Blank => Ok("  \n\t ".to_string()),
            Behaviour::AlwaysFail(msg) => Err(RecognitionError::Transient { detail: msg }),
            Behaviour::FailTimes(n) if call <= n => Err(RecognitionError::Transient {
                detail: format!("503 on call {call}"),
            }),
            Behaviour::FailTimes(_) => Ok(page_text(page)),
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// Delegates to an in-memory SQLite ledger but refuses writes for chosen
/// pages, as if the store were unreachable at that moment.
pub struct FlakyLedger {
    inner: SqliteLedger,
    refuse: Mutex<HashSet<u32>>,
    races: Mutex<HashMap<Uuid, u32>>,
}

impl FlakyLedger {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteLedger::in_memory().await.unwrap(),
            refuse: Mutex::new(HashSet::new()),
            races: Mutex::new(HashMap::new()),
        })
    }

    pub fn refuse_page(&self, page: u32) {
        self.refuse.lock().unwrap().insert(page);
    }

    /// Another writer sets `num_pages` for `issue_id` to `pages` just before
    /// this ledger's own `set_page_count` lands.
    pub fn race_page_count(&self, issue_id: Uuid, pages: u32) {
        self.races.lock().unwrap().insert(issue_id, pages);
    }

    pub fn heal(&self) {
        self.refuse.lock().unwrap().clear();
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get_or_create_issue(&self, filename: &str) -> Result<Issue, LedgerError> {
        self.inner.get_or_create_issue(filename).await
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, LedgerError> {
        self.inner.list_issues().await
    }

    async fn set_page_count(
        &self,
        issue_id: Uuid,
        num_pages: u32,
    ) -> Result<PageCountUpdate, LedgerError> {
        let raced = self.races.lock().unwrap().remove(&issue_id);
        if let Some(other) = raced {
            self.inner.set_page_count(issue_id, other).await?;
        }
        self.inner.set_page_count(issue_id, num_pages).await
    }

    async fn processed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError> {
        self.inner.processed_page_numbers(issue_id).await
    }

    async fn failed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError> {
        self.inner.failed_page_numbers(issue_id).await
    }

    async fn record_page(
        &self,
        issue_id: Uuid,
        page_number: u32,
        text: &str,
        error: bool,
    ) -> Result<(), LedgerError> {
        if self.refuse.lock().unwrap().contains(&page_number) {
            return Err(LedgerError::Persistence(sqlx::Error::PoolTimedOut));
        }
        self.inner.record_page(issue_id, page_number, text, error).await
    }

    async fn retire_failed_pages(&self, issue_id: Uuid) -> Result<u64, LedgerError> {
        self.inner.retire_failed_pages(issue_id).await
    }

    async fn ordered_successful_pages(
        &self,
        issue_id: Uuid,
    ) -> Result<Vec<(u32, String)>, LedgerError> {
        self.inner.ordered_successful_pages(issue_id).await
    }

    async fn pages(&self, issue_id: Uuid) -> Result<Vec<PageRecord>, LedgerError> {
        self.inner.pages(issue_id).await
    }

    async fn total_page_rows(&self) -> Result<u64, LedgerError> {
        self.inner.total_page_rows().await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Fast config: millisecond retry delays, default widths.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::builder()
        .retry_delay(Duration::from_millis(1))
        .build()
        .unwrap()
}

/// A batch directory holding empty `*.pdf` placeholders; the fake source
/// never reads them.
pub fn batch_dir(filenames: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in filenames {
        std::fs::write(dir.path().join(name), b"%PDF-1.7\n").unwrap();
    }
    dir
}

pub fn paths(dir: &Path, filenames: &[&str]) -> Vec<PathBuf> {
    filenames.iter().map(|f| dir.join(f)).collect()
}

pub async fn issue_id(ledger: &dyn Ledger, filename: &str) -> Uuid {
    ledger.get_or_create_issue(filename).await.unwrap().id
}
