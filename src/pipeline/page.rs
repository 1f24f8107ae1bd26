//! Page processor: render → recognise (with retries) → record exactly one row.
//!
//! ## Outcome classification
//!
//! | Recognition result              | Row written                      | Outcome           |
//! |---------------------------------|----------------------------------|-------------------|
//! | text                            | `error = false`, text            | `Recognized`      |
//! | blank text or empty response    | `error = true`, `ERROR: …`       | `Failed`          |
//! | transient error × max attempts  | `error = true`, last error       | `Failed`          |
//!
//! Writing the row can still go wrong. A duplicate-key rejection means
//! another run recorded the page first and is reported as `AlreadyRecorded`.
//! Any other ledger failure (and a render failure before recognition) writes
//! nothing and reports `Lost`, so the page stays pending for the next run.
//!
//! The processor never updates or deletes rows.

use crate::config::PipelineConfig;
use crate::ledger::Ledger;
use crate::output::{PageOutcome, PageReport};
use crate::pipeline::llm::{non_empty, Recognizer};
use crate::pipeline::render::{DocumentHandle, DocumentSource};
use crate::pipeline::retry::RetryPolicy;
use crate::prompts::error_result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Processes single pages. Cheap to clone; clones share the injected clients.
#[derive(Clone)]
pub struct PageProcessor {
    source: Arc<dyn DocumentSource>,
    recognizer: Arc<dyn Recognizer>,
    ledger: Arc<dyn Ledger>,
    retry: RetryPolicy,
    prompt: Arc<str>,
    dpi: u32,
}

impl PageProcessor {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        recognizer: Arc<dyn Recognizer>,
        ledger: Arc<dyn Ledger>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            recognizer,
            ledger,
            retry: config.retry,
            prompt: Arc::from(config.prompt.as_str()),
            dpi: config.dpi,
        }
    }

    /// Process page `page_number` of `handle` for issue `issue_id`.
    ///
    /// Never fails: every failure mode is folded into the returned report.
    pub async fn process(
        &self,
        handle: &DocumentHandle,
        issue_id: Uuid,
        page_number: u32,
    ) -> PageReport {
        let start = Instant::now();
        let outcome = self.run(handle, issue_id, page_number).await;
        PageReport {
            page_number,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run(&self, handle: &DocumentHandle, issue_id: Uuid, page_number: u32) -> PageOutcome {
        let filename = handle.filename();

        let image = match self.source.render_page(handle, page_number, self.dpi).await {
            Ok(img) => img,
            Err(e) => {
                warn!("{} page {}: render failed: {}", filename, page_number, e);
                return PageOutcome::Lost {
                    reason: e.to_string(),
                };
            }
        };

        let recognizer = &self.recognizer;
        let prompt: &str = &self.prompt;
        let image_ref = &image;
        let retried = self
            .retry
            .run(move |attempt| {
                debug!("{} page {}: recognition attempt {}", filename, page_number, attempt);
                async move { recognizer.recognize(image_ref, prompt).await.and_then(non_empty) }
            })
            .await;
        drop(image);

        let attempts = retried.attempts;
        let (text, is_error, outcome) = match retried.result {
            Ok(text) => {
                let chars = text.chars().count();
                (text, false, PageOutcome::Recognized { chars, attempts })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    "{} page {}: recording failure after {} attempt(s): {}",
                    filename, page_number, attempts, reason
                );
                (
                    error_result(&reason),
                    true,
                    PageOutcome::Failed { reason, attempts },
                )
            }
        };

        match self
            .ledger
            .record_page(issue_id, page_number, &text, is_error)
            .await
        {
            Ok(()) => {
                debug!("{} page {}: recorded (error={})", filename, page_number, is_error);
                outcome
            }
            Err(e) if e.is_duplicate() => {
                info!("{} page {}: already recorded by another run", filename, page_number);
                PageOutcome::AlreadyRecorded
            }
            Err(e) => {
                warn!(
                    "{} page {}: result lost, page stays pending: {}",
                    filename, page_number, e
                );
                PageOutcome::Lost {
                    reason: e.to_string(),
                }
            }
        }
    }
}
