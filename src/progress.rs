//! Progress-callback trait for per-page and per-document events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through a batch.
//!
//! Pages and documents run concurrently, so every method may be called from
//! several tasks at once and events arrive in completion order.
//!
//! # Example
//!
//! ```rust
//! use ocr_ledger::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgressCallback for Counter {
//!     fn on_page_complete(&self, _filename: &str, _page: u32, _chars: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchReport, DocumentReport};
use std::sync::Arc;

/// Called by the orchestrator as it processes documents and pages.
///
/// All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once with the number of documents discovered.
    fn on_batch_start(&self, documents: usize) {
        let _ = documents;
    }

    /// Called when a document's pending set is known.
    fn on_document_start(&self, filename: &str, total_pages: u32, pending: usize) {
        let _ = (filename, total_pages, pending);
    }

    /// Called when a page is recorded as a success.
    fn on_page_complete(&self, filename: &str, page: u32, chars: usize) {
        let _ = (filename, page, chars);
    }

    /// Called when a page is recorded as an error, or lost for this run.
    fn on_page_error(&self, filename: &str, page: u32, error: &str) {
        let _ = (filename, page, error);
    }

    /// Called when a document has finished, been skipped, or aborted.
    fn on_document_complete(&self, report: &DocumentReport) {
        let _ = report;
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, report: &BatchReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
