//! # ocr-ledger
//!
//! Resumable, concurrent OCR of multi-page PDFs into a persistent ledger.
//!
//! Each page is rendered to an image, sent to a vision model for
//! transcription, and the text (or a recorded failure) is stored keyed by
//! document and page number. Re-running after a partial failure does only the
//! missing work: the ledger, not the run, knows which pages are done.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory of PDFs
//!  │
//!  ├─ 1. Discover   *.pdf in lexicographic order
//!  ├─ 2. Resolve    issue row per file, declared page count
//!  ├─ 3. Snapshot   pending = {1..=pages} − pages already in the ledger
//!  ├─ 4. Process    render → recognise (bounded retries) → record one row
//!  └─ 5. Reconcile  count check, ordered assembly of complete issues
//! ```
//!
//! Documents run on an outer pool and pages on an inner pool, both bounded.
//! The ledger enforces one row per `(issue, page)`; a losing concurrent insert
//! is treated as "already done".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_ledger::{LlmRecognizer, Orchestrator, PdfiumSource, PipelineConfig, SqliteLedger};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = Arc::new(SqliteLedger::connect("sqlite://ledger.db").await?);
//!     let source = Arc::new(PdfiumSource::new(None)?);
//!     let recognizer = Arc::new(LlmRecognizer::from_env(Some("gemini"), None)?);
//!
//!     let orchestrator =
//!         Orchestrator::new(source, recognizer, ledger, PipelineConfig::default());
//!     let report = orchestrator.run_directory(Path::new("WECs")).await?;
//!     eprintln!("{} pages recognised, {} failed", report.recognized(), report.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-ledger` binary (clap + anyhow + dotenvy + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reconcile;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSeparator, PipelineConfig, PipelineConfigBuilder, ResumePolicy};
pub use error::{IngestError, LedgerError, RecognitionError, SourceAccessError};
pub use ledger::{Issue, Ledger, PageCountUpdate, PageRecord, SqliteLedger};
pub use orchestrator::Orchestrator;
pub use output::{BatchReport, DocumentReport, DocumentStatus, PageOutcome, PageReport};
pub use pipeline::llm::{LlmRecognizer, Recognizer};
pub use pipeline::page::PageProcessor;
pub use pipeline::render::{DocumentHandle, DocumentSource, PdfiumSource, RasterImage};
pub use pipeline::retry::{Backoff, RetryPolicy};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use reconcile::{
    AssemblyOutcome, AssemblyReport, CompletionSummary, CountCheck, CountStatus, Reconciler,
};
