//! SQLite ledger over an sqlx connection pool.
//!
//! The schema is bootstrapped on connect with `CREATE TABLE IF NOT EXISTS`.
//! The `UNIQUE (parent_issue_id, page_number)` constraint on `page` is what
//! makes concurrent inserts for the same page safe; the driver's
//! unique-violation signal is translated into [`LedgerError::DuplicateKey`].

use super::{Issue, Ledger, PageCountUpdate, PageRecord};
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS issue (
        id TEXT PRIMARY KEY,
        filename TEXT NOT NULL UNIQUE,
        num_pages INTEGER CHECK (num_pages IS NULL OR num_pages >= 0),
        description TEXT,
        source_url TEXT,
        pdf_url TEXT,
        published_on TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS page (
        id TEXT PRIMARY KEY,
        parent_issue_id TEXT NOT NULL REFERENCES issue(id),
        page_number INTEGER NOT NULL CHECK (page_number >= 1),
        ocr_result TEXT NOT NULL,
        error INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (parent_issue_id, page_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_page_issue ON page (parent_issue_id)",
];

const ISSUE_COLUMNS: &str =
    "id, filename, num_pages, description, source_url, pdf_url, published_on";

/// [`Ledger`] stored in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://ledger.db`.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        info!("Connected to ledger at {}", url);
        Self::from_pool(pool).await
    }

    /// A private in-memory ledger. One connection is kept alive for the
    /// lifetime of the pool because every new connection would see an empty
    /// database.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, bootstrapping the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, LedgerError> {
        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Ledger schema ready");
        Ok(())
    }

    async fn stored_page_count(&self, issue_id: Uuid) -> Result<Option<u32>, LedgerError> {
        let row = sqlx::query("SELECT num_pages FROM issue WHERE id = ?")
            .bind(issue_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::IssueNotFound(issue_id))?;
        row.try_get::<Option<i64>, _>("num_pages")?
            .map(|n| to_page_number(n, "num_pages"))
            .transpose()
    }

    async fn page_numbers_where(
        &self,
        issue_id: Uuid,
        only_errors: bool,
    ) -> Result<BTreeSet<u32>, LedgerError> {
        let sql = if only_errors {
            "SELECT page_number FROM page WHERE parent_issue_id = ? AND error = 1"
        } else {
            "SELECT page_number FROM page WHERE parent_issue_id = ?"
        };
        let numbers: Vec<i64> = sqlx::query_scalar(sql)
            .bind(issue_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        numbers
            .into_iter()
            .map(|n| to_page_number(n, "page_number"))
            .collect()
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn get_or_create_issue(&self, filename: &str) -> Result<Issue, LedgerError> {
        // Insert-or-ignore then read back: two concurrent callers converge on one row.
        let inserted = sqlx::query(
            "INSERT INTO issue (id, filename) VALUES (?, ?) ON CONFLICT(filename) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(filename)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!("Created issue for {}", filename);
        }

        let row = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issue WHERE filename = ?"
        ))
        .bind(filename)
        .fetch_one(&self.pool)
        .await?;
        issue_from_row(&row)
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issue ORDER BY filename"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn set_page_count(
        &self,
        issue_id: Uuid,
        num_pages: u32,
    ) -> Result<PageCountUpdate, LedgerError> {
        let updated =
            sqlx::query("UPDATE issue SET num_pages = ? WHERE id = ? AND num_pages IS NULL")
                .bind(i64::from(num_pages))
                .bind(issue_id.to_string())
                .execute(&self.pool)
                .await?;

        if updated.rows_affected() > 0 {
            debug!("Issue {}: num_pages set to {}", issue_id, num_pages);
            return Ok(PageCountUpdate::Set);
        }

        match self.stored_page_count(issue_id).await? {
            Some(stored) if stored == num_pages => Ok(PageCountUpdate::Unchanged),
            Some(stored) => {
                warn!(
                    "Issue {}: refusing to change num_pages from {} to {}",
                    issue_id, stored, num_pages
                );
                Err(LedgerError::PageCountConflict {
                    issue_id,
                    stored,
                    requested: num_pages,
                })
            }
            // Lost a race with a concurrent reset; nothing sets it back to null.
            None => Err(LedgerError::InvalidRecord(format!(
                "issue {issue_id}: num_pages still null after update"
            ))),
        }
    }

    async fn processed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError> {
        self.page_numbers_where(issue_id, false).await
    }

    async fn failed_page_numbers(&self, issue_id: Uuid) -> Result<BTreeSet<u32>, LedgerError> {
        self.page_numbers_where(issue_id, true).await
    }

    async fn record_page(
        &self,
        issue_id: Uuid,
        page_number: u32,
        text: &str,
        error: bool,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "INSERT INTO page (id, parent_issue_id, page_number, ocr_result, error) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(issue_id.to_string())
        .bind(i64::from(page_number))
        .bind(text)
        .bind(error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::DuplicateKey {
                    issue_id,
                    page_number,
                })
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(LedgerError::IssueNotFound(issue_id))
            }
            Err(e) => Err(LedgerError::Persistence(e)),
        }
    }

    async fn retire_failed_pages(&self, issue_id: Uuid) -> Result<u64, LedgerError> {
        let deleted = sqlx::query("DELETE FROM page WHERE parent_issue_id = ? AND error = 1")
            .bind(issue_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    async fn ordered_successful_pages(
        &self,
        issue_id: Uuid,
    ) -> Result<Vec<(u32, String)>, LedgerError> {
        let rows = sqlx::query(
            "SELECT page_number, ocr_result FROM page \
             WHERE parent_issue_id = ? AND error = 0 ORDER BY page_number ASC",
        )
        .bind(issue_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(u32, String), LedgerError> {
                let n = to_page_number(row.try_get("page_number")?, "page_number")?;
                Ok((n, row.try_get::<String, _>("ocr_result")?))
            })
            .collect()
    }

    async fn pages(&self, issue_id: Uuid) -> Result<Vec<PageRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, parent_issue_id, page_number, ocr_result, error FROM page \
             WHERE parent_issue_id = ? ORDER BY page_number ASC",
        )
        .bind(issue_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(page_from_row).collect()
    }

    async fn page_row_count(&self, issue_id: Uuid) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM page WHERE parent_issue_id = ?")
            .bind(issue_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn total_page_rows(&self) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM page")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn parse_uuid(value: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(value).map_err(|e| LedgerError::InvalidRecord(format!("bad id '{value}': {e}")))
}

fn to_page_number(value: i64, column: &str) -> Result<u32, LedgerError> {
    u32::try_from(value)
        .map_err(|_| LedgerError::InvalidRecord(format!("{column} out of range: {value}")))
}

fn issue_from_row(row: &SqliteRow) -> Result<Issue, LedgerError> {
    Ok(Issue {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        filename: row.try_get("filename")?,
        num_pages: row
            .try_get::<Option<i64>, _>("num_pages")?
            .map(|n| to_page_number(n, "num_pages"))
            .transpose()?,
        description: row.try_get("description")?,
        source_url: row.try_get("source_url")?,
        pdf_url: row.try_get("pdf_url")?,
        published_on: row.try_get::<Option<NaiveDate>, _>("published_on")?,
    })
}

fn page_from_row(row: &SqliteRow) -> Result<PageRecord, LedgerError> {
    Ok(PageRecord {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        parent_issue_id: parse_uuid(&row.try_get::<String, _>("parent_issue_id")?)?,
        page_number: to_page_number(row.try_get("page_number")?, "page_number")?,
        ocr_result: row.try_get("ocr_result")?,
        error: row.try_get("error")?,
    })
}
