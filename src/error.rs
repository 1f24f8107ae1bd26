//! Error types for the ocr-ledger library.
//!
//! Failures are split by the blast radius they are allowed to have:
//!
//! * [`IngestError`] — **Fatal**: the run cannot start at all (bad config,
//!   unreachable database, missing batch directory). Returned as `Err` from
//!   the top-level entry points.
//!
//! * [`SourceAccessError`] — **Document-level**: one source file is missing,
//!   unreadable or corrupt. Aborts that document only; sibling documents
//!   continue.
//!
//! * [`RecognitionError`] — **Page-level**: the recognition call failed or
//!   returned nothing. Retried or recorded as an error row, never propagated
//!   past the page.
//!
//! * [`LedgerError`] — persistence failures. `DuplicateKey` is benign (another
//!   run already captured the page); everything else leaves the page pending
//!   for the next run.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Fatal errors returned by the batch entry points.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The batch directory does not exist or is not a directory.
    #[error("Source directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// The batch directory exists but could not be listed.
    #[error("Failed to scan '{path}': {source}")]
    DirectoryScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger could not be opened or queried.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The configured recognition provider is not initialised (missing API key etc.).
    #[error("Recognition provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not create or write an assembled output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A source document could not be opened or rendered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceAccessError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// A page outside `1..=page_count` was requested.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RenderFailed { page: u32, detail: String },

    /// The pdfium shared library could not be bound.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium."
    )]
    EngineUnavailable(String),

    /// A blocking render task panicked or was cancelled.
    #[error("Internal render error: {0}")]
    Internal(String),
}

/// Outcome of a failed recognition call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    /// Network, quota or provider failure. Worth retrying.
    #[error("{detail}")]
    Transient { detail: String },

    /// The service answered with no text (refusal, copyright filter, blank page).
    #[error("empty response from recognition service")]
    EmptyResponse,

    /// The call did not complete within the per-call deadline.
    #[error("recognition call timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl RecognitionError {
    /// Whether another attempt may produce a different result.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RecognitionError::EmptyResponse)
    }
}

/// Errors raised by a [`crate::ledger::Ledger`] implementation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A page row for `(issue_id, page_number)` already exists.
    #[error("Page {page_number} of issue {issue_id} is already recorded")]
    DuplicateKey { issue_id: Uuid, page_number: u32 },

    /// `num_pages` is already set to a different value.
    #[error("Issue {issue_id} declares {stored} pages but {requested} were requested")]
    PageCountConflict {
        issue_id: Uuid,
        stored: u32,
        requested: u32,
    },

    /// No issue row with this id.
    #[error("Issue {0} not found")]
    IssueNotFound(Uuid),

    /// A stored value could not be mapped back to a record.
    #[error("Invalid ledger record: {0}")]
    InvalidRecord(String),

    /// The backing store is unreachable or rejected the write.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl LedgerError {
    /// `true` for the benign "another run already recorded this page" signal.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::DuplicateKey { .. })
    }
}
