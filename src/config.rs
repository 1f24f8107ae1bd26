//! Configuration types for a resumable OCR run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The document source, the recognition client
//! and the ledger are *not* part of the config: they are constructed by the
//! caller (pdfium location, per-call deadline, database URL) and handed to
//! [`crate::orchestrator::Orchestrator`] explicitly.

use crate::error::IngestError;
use crate::pipeline::retry::{Backoff, RetryPolicy};
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_OCR_PROMPT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use ocr_ledger::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .document_concurrency(2)
///     .page_concurrency(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Documents processed at the same time (outer pool width). Default: 3.
    pub document_concurrency: usize,

    /// Pages of one document processed at the same time (inner pool width). Default: 10.
    ///
    /// The total number of in-flight recognition calls is bounded by
    /// `document_concurrency × page_concurrency`.
    pub page_concurrency: usize,

    /// Retry policy for the recognition call. Default: 3 attempts, 1 s linear backoff.
    pub retry: RetryPolicy,

    /// Instruction sent with every page image.
    pub prompt: String,

    /// What to do with pages already recorded as failed. Default: [`ResumePolicy::SkipFailed`].
    pub resume_policy: ResumePolicy,

    /// Per-page and per-document progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            document_concurrency: 3,
            page_concurrency: 10,
            retry: RetryPolicy::default(),
            prompt: DEFAULT_OCR_PROMPT.to_string(),
            resume_policy: ResumePolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("document_concurrency", &self.document_concurrency)
            .field("page_concurrency", &self.page_concurrency)
            .field("retry", &self.retry)
            .field("resume_policy", &self.resume_policy)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    pub fn resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.config.resume_policy = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(IngestError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.document_concurrency == 0 || c.page_concurrency == 0 {
            return Err(IngestError::InvalidConfig(
                "Concurrency must be ≥ 1 at both levels".into(),
            ));
        }
        if c.retry.max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.prompt.trim().is_empty() {
            return Err(IngestError::InvalidConfig("Prompt must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How previously failed pages are treated when computing the pending set.
///
/// An error row is a terminal placeholder: with `SkipFailed` it consumes the
/// page slot forever, which avoids re-sending content the service refuses.
/// `RetryFailed` retires error rows before dispatch so those pages are
/// recognised again. Success rows are never touched by either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Error rows count as done (default).
    #[default]
    SkipFailed,
    /// Error rows are cleared and their pages re-enter the pending set.
    RetryFailed,
}

/// How to separate pages in assembled output.
///
/// Passed to [`crate::reconcile::Reconciler::assemble_all`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    Blank,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: u32) -> String {
        match self {
            PageSeparator::Blank => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
