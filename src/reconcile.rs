//! Reconciliation: pending sets, count checks, and final assembly.
//!
//! Everything here reads the ledger as the source of truth and can run
//! independently of a live pipeline.
//!
//! * [`pending_pages`] — `{1..=count} − processed`, the work a document still needs.
//! * [`Reconciler::check_counts`] — compare each issue's persisted row count
//!   with its declared `num_pages`, resolving a null `num_pages` from the
//!   source file first. A mismatch on an already-declared count is reported,
//!   never corrected.
//! * [`Reconciler::assemble_all`] — write one text file per complete issue,
//!   pages in ascending order, error rows omitted. Existing output is never
//!   overwritten, so assembly itself is resumable.

use crate::config::PageSeparator;
use crate::error::{IngestError, LedgerError};
use crate::ledger::{Issue, Ledger, PageCountUpdate};
use crate::pipeline::render::DocumentSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Page numbers in `1..=total` with no row in `processed`, ascending.
pub fn pending_pages(total: u32, processed: &BTreeSet<u32>) -> Vec<u32> {
    (1..=total).filter(|n| !processed.contains(n)).collect()
}

/// Join page texts in ascending page order.
///
/// Input order is irrelevant; pages are sorted before joining.
pub fn assemble_text(pages: &[(u32, String)], separator: &PageSeparator) -> String {
    let mut ordered: Vec<&(u32, String)> = pages.iter().collect();
    ordered.sort_by_key(|(n, _)| *n);

    let mut out = String::new();
    for (i, (page_number, text)) in ordered.into_iter().enumerate() {
        if i > 0 {
            out.push_str(&separator.render(*page_number));
        }
        out.push_str(text.trim_end());
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Result of comparing one issue's declared and persisted page counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CountStatus {
    /// Persisted rows equal `num_pages`.
    Complete,
    /// Persisted rows differ from `num_pages`.
    Mismatch { expected: u32, persisted: u64 },
    /// `num_pages` is null and the source file is not in the batch directory.
    SourceMissing { path: PathBuf },
    /// `num_pages` is null and the source file could not be opened.
    SourceUnreadable { reason: String },
    /// The source page count could not be stored on the issue.
    BackfillFailed { reason: String },
}

/// One line of the count-check report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCheck {
    pub issue_id: Uuid,
    pub filename: String,
    pub num_pages: Option<u32>,
    pub persisted: u64,
    /// `num_pages` was null and has just been set from the source.
    pub backfilled: bool,
    pub status: CountStatus,
}

impl CountCheck {
    pub fn is_complete(&self) -> bool {
        self.status == CountStatus::Complete
    }
}

/// Result of assembling one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssemblyOutcome {
    /// Output written with this many successful pages.
    Written { path: PathBuf, pages: usize },
    /// Output already existed; left untouched.
    AlreadyAssembled { path: PathBuf },
    /// Persisted rows do not match `num_pages` yet.
    Incomplete { expected: u32, persisted: u64 },
    /// `num_pages` has never been resolved.
    UnknownPageCount,
}

/// One line of the assembly report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub issue_id: Uuid,
    pub filename: String,
    pub outcome: AssemblyOutcome,
}

/// Ledger-wide progress: persisted rows against declared pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub issues: usize,
    /// Issues whose `num_pages` is still null.
    pub issues_without_page_count: usize,
    pub declared_pages: u64,
    pub persisted_pages: u64,
    pub percent_complete: f64,
}

/// Runs count checks and assembly against a ledger.
///
/// A document source is only needed to resolve null page counts during
/// [`Reconciler::check_counts`]; assembly and summaries read the ledger alone.
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    source: Option<Arc<dyn DocumentSource>>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Count-check every issue, resolving null page counts from `source_dir`.
    pub async fn check_counts(&self, source_dir: &Path) -> Result<Vec<CountCheck>, IngestError> {
        let issues = self.ledger.list_issues().await?;
        let mut checks = Vec::with_capacity(issues.len());
        for issue in &issues {
            let check = self.check_issue(issue, source_dir).await?;
            match &check.status {
                CountStatus::Complete => debug!("✓ {}: {} pages", check.filename, check.persisted),
                CountStatus::Mismatch {
                    expected,
                    persisted,
                } => warn!(
                    "Mismatch for {}: should have {} pages, ledger has {}",
                    check.filename, expected, persisted
                ),
                CountStatus::SourceMissing { path } => {
                    warn!("PDF not found for {}: {}", check.filename, path.display())
                }
                CountStatus::SourceUnreadable { reason } => {
                    warn!("Cannot read {}: {}", check.filename, reason)
                }
                CountStatus::BackfillFailed { reason } => {
                    warn!("Cannot set page count for {}: {}", check.filename, reason)
                }
            }
            checks.push(check);
        }
        Ok(checks)
    }

    /// Count-check a single issue.
    pub async fn check_issue(
        &self,
        issue: &Issue,
        source_dir: &Path,
    ) -> Result<CountCheck, LedgerError> {
        let persisted = self.ledger.page_row_count(issue.id).await?;
        let mut check = CountCheck {
            issue_id: issue.id,
            filename: issue.filename.clone(),
            num_pages: issue.num_pages,
            persisted,
            backfilled: false,
            status: CountStatus::Complete,
        };

        let expected = match issue.num_pages {
            Some(n) => n,
            None => {
                let path = source_dir.join(&issue.filename);
                if !path.exists() {
                    check.status = CountStatus::SourceMissing { path };
                    return Ok(check);
                }
                let Some(source) = &self.source else {
                    check.status = CountStatus::SourceUnreadable {
                        reason: "no document source configured".to_string(),
                    };
                    return Ok(check);
                };
                let handle = match source.open(&path).await {
                    Ok(h) => h,
                    Err(e) => {
                        check.status = CountStatus::SourceUnreadable {
                            reason: e.to_string(),
                        };
                        return Ok(check);
                    }
                };
                let n = handle.page_count();
                match self.ledger.set_page_count(issue.id, n).await {
                    Ok(PageCountUpdate::Set) => {
                        info!("Updated {}: set to {} pages", issue.filename, n);
                        check.backfilled = true;
                    }
                    Ok(PageCountUpdate::Unchanged) => {}
                    Err(e) => {
                        check.status = CountStatus::BackfillFailed {
                            reason: e.to_string(),
                        };
                        return Ok(check);
                    }
                }
                check.num_pages = Some(n);
                n
            }
        };

        if persisted != u64::from(expected) {
            check.status = CountStatus::Mismatch {
                expected,
                persisted,
            };
        }
        Ok(check)
    }

    /// Assemble every complete issue into `output_dir`.
    pub async fn assemble_all(
        &self,
        output_dir: &Path,
        separator: &PageSeparator,
    ) -> Result<Vec<AssemblyReport>, IngestError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| IngestError::OutputWriteFailed {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let issues = self.ledger.list_issues().await?;
        let mut reports = Vec::with_capacity(issues.len());
        for issue in &issues {
            let outcome = self.assemble(issue, output_dir, separator).await?;
            reports.push(AssemblyReport {
                issue_id: issue.id,
                filename: issue.filename.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    /// Assemble one issue into `output_dir/<stem>.md`.
    pub async fn assemble(
        &self,
        issue: &Issue,
        output_dir: &Path,
        separator: &PageSeparator,
    ) -> Result<AssemblyOutcome, IngestError> {
        let path = output_path(output_dir, &issue.filename);
        if path.exists() {
            debug!("{}: already assembled at {}", issue.filename, path.display());
            return Ok(AssemblyOutcome::AlreadyAssembled { path });
        }

        let Some(expected) = issue.num_pages else {
            return Ok(AssemblyOutcome::UnknownPageCount);
        };
        let persisted = self.ledger.page_row_count(issue.id).await?;
        if persisted != u64::from(expected) {
            debug!(
                "{}: not assembling, {} of {} pages persisted",
                issue.filename, persisted, expected
            );
            return Ok(AssemblyOutcome::Incomplete {
                expected,
                persisted,
            });
        }

        let pages = self.ledger.ordered_successful_pages(issue.id).await?;
        let text = assemble_text(&pages, separator);
        let dir = output_dir.to_path_buf();
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || write_new_file(&dir, &target, &text))
            .await
            .map_err(|e| IngestError::Internal(format!("Write task panicked: {}", e)))?;

        match written {
            Ok(true) => {
                info!("Assembled {} ({} pages) → {}", issue.filename, pages.len(), path.display());
                Ok(AssemblyOutcome::Written {
                    path,
                    pages: pages.len(),
                })
            }
            Ok(false) => Ok(AssemblyOutcome::AlreadyAssembled { path }),
            Err(e) => Err(IngestError::OutputWriteFailed { path, source: e }),
        }
    }

    /// Persisted rows against declared pages across the whole ledger.
    pub async fn completion_summary(&self) -> Result<CompletionSummary, LedgerError> {
        let issues = self.ledger.list_issues().await?;
        let declared_pages: u64 = issues
            .iter()
            .filter_map(|i| i.num_pages)
            .map(u64::from)
            .sum();
        let persisted_pages = self.ledger.total_page_rows().await?;
        let percent_complete = if declared_pages == 0 {
            0.0
        } else {
            persisted_pages as f64 / declared_pages as f64 * 100.0
        };

        Ok(CompletionSummary {
            issues: issues.len(),
            issues_without_page_count: issues.iter().filter(|i| i.num_pages.is_none()).count(),
            declared_pages,
            persisted_pages,
            percent_complete,
        })
    }
}

/// `output_dir/<file stem>.md`.
pub fn output_path(output_dir: &Path, filename: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    output_dir.join(format!("{stem}.md"))
}

/// Write `text` to `target` via a temp file in `dir`.
///
/// Returns `Ok(false)` without touching `target` if it already exists.
fn write_new_file(dir: &Path, target: &Path, text: &str) -> std::io::Result<bool> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;
    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
