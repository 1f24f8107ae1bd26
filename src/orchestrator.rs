//! Batch entry point: a two-level bounded worker pool.
//!
//! ```text
//! directory ──▶ documents (outer pool, width = document_concurrency)
//!                  │
//!                  ├─ issue      get_or_create_issue(filename)
//!                  ├─ open       page count from the source
//!                  ├─ declare    set_page_count when num_pages is null
//!                  ├─ snapshot   pending = {1..=count} − processed_page_numbers
//!                  └─ pages (inner pool, width = page_concurrency)
//!                        └─ PageProcessor::process → exactly one ledger row
//! ```
//!
//! The pending set is a single snapshot per document; it is not re-read while
//! pages are in flight. Two runs racing on the same document can both
//! dispatch a page; the ledger's uniqueness constraint decides the winner and
//! the loser reports `AlreadyRecorded`.
//!
//! Failures stay where they happen: a page failure never touches its
//! siblings, and a document that cannot be opened is reported as aborted
//! while the rest of the batch continues. [`Orchestrator::run_batch`] itself
//! cannot fail.

use crate::config::{PipelineConfig, ResumePolicy};
use crate::error::{IngestError, LedgerError};
use crate::ledger::Ledger;
use crate::output::{BatchReport, DocumentReport, DocumentStatus, PageOutcome, PageReport};
use crate::pipeline::input::{discover_documents, document_filename};
use crate::pipeline::llm::Recognizer;
use crate::pipeline::page::PageProcessor;
use crate::pipeline::render::{DocumentHandle, DocumentSource};
use crate::reconcile::pending_pages;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Owns the injected clients and drives documents through the pipeline.
pub struct Orchestrator {
    source: Arc<dyn DocumentSource>,
    ledger: Arc<dyn Ledger>,
    processor: PageProcessor,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Build an orchestrator from explicitly constructed clients.
    ///
    /// `recognizer` and `ledger` are shared by every worker; both traits
    /// require `Send + Sync`, so implementations must tolerate concurrent calls.
    pub fn new(
        source: Arc<dyn DocumentSource>,
        recognizer: Arc<dyn Recognizer>,
        ledger: Arc<dyn Ledger>,
        config: PipelineConfig,
    ) -> Self {
        let processor = PageProcessor::new(
            Arc::clone(&source),
            recognizer,
            Arc::clone(&ledger),
            &config,
        );
        Self {
            source,
            ledger,
            processor,
            config,
        }
    }

    /// Discover every source file in `dir` and process them.
    pub async fn run_directory(&self, dir: &Path) -> Result<BatchReport, IngestError> {
        let paths = discover_documents(dir)?;
        info!("Processing {} documents from {}", paths.len(), dir.display());
        Ok(self.run_batch(&paths).await)
    }

    /// Process `paths`. The report lists documents in input order.
    pub async fn run_batch(&self, paths: &[PathBuf]) -> BatchReport {
        let start = Instant::now();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(paths.len());
        }

        let mut indexed: Vec<(usize, DocumentReport)> =
            stream::iter(paths.iter().enumerate().map(|(i, path)| async move {
                (i, self.run_document(path).await)
            }))
            .buffer_unordered(self.config.document_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let report = BatchReport {
            documents: indexed.into_iter().map(|(_, r)| r).collect(),
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Batch complete: {} documents, {} pages recognised, {} failed, {} lost, {} aborted, {}ms",
            report.documents.len(),
            report.recognized(),
            report.failed(),
            report.lost(),
            report.aborted_documents(),
            report.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(&report);
        }
        report
    }

    /// Process one document: resolve its issue, dispatch pending pages, wait for them.
    pub async fn run_document(&self, path: &Path) -> DocumentReport {
        let filename = document_filename(path);
        let report = match self.prepare(path, &filename).await {
            Ok(Prepared::Ready {
                handle,
                issue_id,
                previously_processed,
                retired_failures,
                pending,
            }) => {
                let pages = self.dispatch(&handle, issue_id, pending).await;
                let report = DocumentReport {
                    filename: filename.clone(),
                    issue_id: Some(issue_id),
                    total_pages: Some(handle.page_count()),
                    previously_processed,
                    retired_failures,
                    status: DocumentStatus::Processed,
                    pages,
                };
                info!(
                    "{}: {} recognised, {} failed, {} already recorded, {} lost",
                    filename,
                    report.recognized(),
                    report.failed(),
                    report.already_recorded(),
                    report.lost()
                );
                report
            }
            Ok(Prepared::Done {
                issue_id,
                total_pages,
                previously_processed,
                retired_failures,
            }) => {
                info!("All {} pages already processed for {}", total_pages, filename);
                DocumentReport {
                    filename: filename.clone(),
                    issue_id: Some(issue_id),
                    total_pages: Some(total_pages),
                    previously_processed,
                    retired_failures,
                    status: DocumentStatus::Skipped,
                    pages: Vec::new(),
                }
            }
            Err((issue_id, reason)) => {
                error!("{}: aborted: {}", filename, reason);
                DocumentReport::aborted(filename.clone(), issue_id, reason)
            }
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(&report);
        }
        report
    }

    /// Steps 1–4: issue, page count, declared count, pending snapshot.
    async fn prepare(
        &self,
        path: &Path,
        filename: &str,
    ) -> Result<Prepared, (Option<Uuid>, String)> {
        let issue = self
            .ledger
            .get_or_create_issue(filename)
            .await
            .map_err(|e| (None, e.to_string()))?;
        let fail = |e: String| (Some(issue.id), e);

        let handle = self
            .source
            .open(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let count = handle.page_count();

        match issue.num_pages {
            None => {
                self.ledger
                    .set_page_count(issue.id, count)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
            }
            Some(stored) if stored == count => {}
            Some(stored) => {
                return Err(fail(
                    LedgerError::PageCountConflict {
                        issue_id: issue.id,
                        stored,
                        requested: count,
                    }
                    .to_string(),
                ))
            }
        }

        let retired_failures = match self.config.resume_policy {
            ResumePolicy::SkipFailed => 0,
            ResumePolicy::RetryFailed => {
                let n = self
                    .ledger
                    .retire_failed_pages(issue.id)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                if n > 0 {
                    info!("{}: retrying {} previously failed pages", filename, n);
                }
                n
            }
        };

        let processed = self
            .ledger
            .processed_page_numbers(issue.id)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let pending = pending_pages(count, &processed);

        info!(
            "{}: {} pages, {} already in ledger, {} pending",
            filename,
            count,
            processed.len(),
            pending.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(filename, count, pending.len());
        }

        if pending.is_empty() {
            return Ok(Prepared::Done {
                issue_id: issue.id,
                total_pages: count,
                previously_processed: processed.len(),
                retired_failures,
            });
        }

        Ok(Prepared::Ready {
            handle,
            issue_id: issue.id,
            previously_processed: processed.len(),
            retired_failures,
            pending,
        })
    }

    /// Steps 5–6: fan pending pages out on the inner pool and wait for all of them.
    ///
    /// Each page runs as its own spawned task, so pages of one document make
    /// progress on separate runtime worker threads. At most `page_concurrency`
    /// tasks exist at once.
    async fn dispatch(
        &self,
        handle: &DocumentHandle,
        issue_id: Uuid,
        pending: Vec<u32>,
    ) -> Vec<PageReport> {
        let callback = self.config.progress_callback.clone();
        let mut pages: Vec<_> = stream::iter(pending.into_iter().map(|page_number| {
            let processor = self.processor.clone();
            let callback = callback.clone();
            let handle = handle.clone();
            let task = tokio::spawn(async move {
                let report = processor.process(&handle, issue_id, page_number).await;
                if let Some(ref cb) = callback {
                    match &report.outcome {
                        PageOutcome::Recognized { chars, .. } => {
                            cb.on_page_complete(handle.filename(), page_number, *chars)
                        }
                        PageOutcome::Failed { reason, .. } | PageOutcome::Lost { reason } => {
                            cb.on_page_error(handle.filename(), page_number, reason)
                        }
                        PageOutcome::AlreadyRecorded => {}
                    }
                }
                report
            });
            async move {
                task.await.unwrap_or_else(|e| {
                    error!("page {} task failed: {}", page_number, e);
                    PageReport {
                        page_number,
                        outcome: PageOutcome::Lost {
                            reason: format!("page task failed: {e}"),
                        },
                        duration_ms: 0,
                    }
                })
            }
        }))
        .buffer_unordered(self.config.page_concurrency)
        .collect()
        .await;

        pages.sort_by_key(|p| p.page_number);
        pages
    }
}

enum Prepared {
    Ready {
        handle: DocumentHandle,
        issue_id: Uuid,
        previously_processed: usize,
        retired_failures: u64,
        pending: Vec<u32>,
    },
    Done {
        issue_id: Uuid,
        total_pages: u32,
        previously_processed: usize,
        retired_failures: u64,
    },
}
