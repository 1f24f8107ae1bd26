//! Run reports: what happened to each page, document and batch.
//!
//! Reports are plain data, `Serialize` so the CLI can print them as JSON.
//! They describe a single run; the ledger remains the durable record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of one page-processor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Text recognised and recorded as a success row.
    Recognized { chars: usize, attempts: u32 },
    /// Recorded as an error row (empty response or exhausted retries).
    Failed { reason: String, attempts: u32 },
    /// Another run recorded this page first; nothing written.
    AlreadyRecorded,
    /// Nothing recorded (render or persistence failure); the page stays pending.
    Lost { reason: String },
}

/// Result for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    pub page_number: u32,
    pub outcome: PageOutcome,
    pub duration_ms: u64,
}

/// How a document's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every pending page was dispatched and finished.
    Processed,
    /// Nothing was pending.
    Skipped,
    /// The document could not be processed at all.
    Aborted { reason: String },
}

/// Per-document summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub filename: String,
    pub issue_id: Option<Uuid>,
    /// Page count from the source, when it could be opened.
    pub total_pages: Option<u32>,
    /// Rows already in the ledger before dispatch.
    pub previously_processed: usize,
    /// Error rows retired under `ResumePolicy::RetryFailed`.
    pub retired_failures: u64,
    pub status: DocumentStatus,
    /// One entry per dispatched page, ascending by page number.
    pub pages: Vec<PageReport>,
}

impl DocumentReport {
    pub(crate) fn aborted(filename: impl Into<String>, issue_id: Option<Uuid>, reason: String) -> Self {
        Self {
            filename: filename.into(),
            issue_id,
            total_pages: None,
            previously_processed: 0,
            retired_failures: 0,
            status: DocumentStatus::Aborted { reason },
            pages: Vec::new(),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.pages.len()
    }

    pub fn recognized(&self) -> usize {
        self.count(|o| matches!(o, PageOutcome::Recognized { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PageOutcome::Failed { .. }))
    }

    pub fn already_recorded(&self) -> usize {
        self.count(|o| matches!(o, PageOutcome::AlreadyRecorded))
    }

    pub fn lost(&self) -> usize {
        self.count(|o| matches!(o, PageOutcome::Lost { .. }))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, DocumentStatus::Aborted { .. })
    }

    fn count(&self, pred: impl Fn(&PageOutcome) -> bool) -> usize {
        self.pages.iter().filter(|p| pred(&p.outcome)).count()
    }
}

/// Summary of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// In discovery (lexicographic) order.
    pub documents: Vec<DocumentReport>,
    pub total_duration_ms: u64,
}

impl BatchReport {
    pub fn recognized(&self) -> usize {
        self.documents.iter().map(DocumentReport::recognized).sum()
    }

    pub fn failed(&self) -> usize {
        self.documents.iter().map(DocumentReport::failed).sum()
    }

    pub fn lost(&self) -> usize {
        self.documents.iter().map(DocumentReport::lost).sum()
    }

    pub fn aborted_documents(&self) -> usize {
        self.documents.iter().filter(|d| d.is_aborted()).count()
    }

    pub fn skipped_documents(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Skipped)
            .count()
    }
}
