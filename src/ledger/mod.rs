//! The ledger: persisted issues and their page rows.
//!
//! The ledger is the only shared mutable state in a run and the source of
//! truth for resume logic. Two rules make concurrent and repeated runs safe:
//!
//! * an issue is read-or-created by file name and its `num_pages` is set at
//!   most once;
//! * page rows are append-only and unique per `(issue, page_number)`, enforced
//!   by the store itself. A second insert fails with
//!   [`LedgerError::DuplicateKey`] instead of creating a duplicate.
//!
//! Page numbers are `u32` everywhere, in memory and in the store, so pending
//! sets computed from `1..=count` compare directly against stored values.

mod sqlite;

pub use sqlite::SqliteLedger;

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// One source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// Natural key; unique.
    pub filename: String,
    /// Declared page count. `None` until first resolved from the source.
    pub num_pages: Option<u32>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,
    pub published_on: Option<NaiveDate>,
}

/// One persisted page outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: Uuid,
    pub parent_issue_id: Uuid,
    /// 1-based.
    pub page_number: u32,
    /// Recognised text, or an error description when `error` is set.
    pub ocr_result: String,
    pub error: bool,
}

/// Result of [`Ledger::set_page_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCountUpdate {
    /// `num_pages` was null and is now set.
    Set,
    /// `num_pages` already held the requested value.
    Unchanged,
}

/// Persistence for issues and pages.
///
/// Every method is safe to call repeatedly.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read the issue by file name, creating it with `num_pages = None` if absent.
    async fn get_or_create_issue(&self, filename: &str) -> Result<Issue, LedgerError>;

    /// All issues, ordered by file name.
    async fn list_issues(&self) -> Result<Vec<Issue>, LedgerError>;

    /// Set `num_pages` once.
    ///
    /// Setting the stored value again is a no-op; a different value is a
    /// [`LedgerError::PageCountConflict`] and the stored value is kept.
    async fn set_page_count(
        &self,
        issue_id: Uuid,
        num_pages: u32,
    ) -> Result<PageCountUpdate, LedgerError>;

    /// Page numbers with a row, success and error alike.
    async fn processed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError>;

    /// Page numbers whose row is an error placeholder.
    async fn failed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError>;

    /// Insert a page row. Fails with [`LedgerError::DuplicateKey`] if one exists.
    async fn record_page(
        &self,
        issue_id: Uuid,
        page_number: u32,
        text: &str,
        error: bool,
    ) -> Result<(), LedgerError>;

    /// Delete the issue's error rows so those pages become pending again.
    /// Returns how many rows were removed.
    async fn retire_failed_pages(&self, issue_id: Uuid) -> Result<u64, LedgerError>;

    /// `(page_number, text)` of successful rows, ascending by page number.
    async fn ordered_successful_pages(
        &self,
        issue_id: Uuid,
    ) -> Result<Vec<(u32, String)>, LedgerError>;

    /// Every row of the issue, ascending by page number.
    async fn pages(&self, issue_id: Uuid) -> Result<Vec<PageRecord>, LedgerError>;

    /// Number of rows for the issue, error rows included.
    async fn page_row_count(&self, issue_id: Uuid) -> Result<u64, LedgerError> {
        Ok(self.processed_page_numbers(issue_id).await?.len() as u64)
    }

    /// Number of page rows across all issues.
    async fn total_page_rows(&self) -> Result<u64, LedgerError>;
}
