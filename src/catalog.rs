//! Dedup store and progress catalog.
//!
//! Every document the pipeline has ever seen has one row in the `catalog`
//! table, keyed by its stable `source_id`. The row's status only moves
//! forward; each transition is a single conditional `UPDATE` that names the
//! allowed predecessor statuses, so concurrent workers cannot lose or regress
//! an update for the same key.
//!
//! The same database holds listing checkpoints (pagination cursors of
//! listings that did not finish).

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::db;
use crate::error::{HarvestError, Result};
use crate::migrate;
use crate::models::{CatalogEntry, DocumentReference, Status, StoredDocument};

/// Number of catalog rows per source and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub source: String,
    pub status: Status,
    pub count: i64,
}

pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (creating if needed) the catalog and verify it can be trusted.
    ///
    /// Any failure here is [`HarvestError::StoreCorrupt`]: a catalog that
    /// cannot be read must stop the run instead of silently re-fetching
    /// everything.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await.map_err(|e| {
            HarvestError::StoreCorrupt(format!("cannot open {}: {:#}", path.display(), e))
        })?;
        migrate::create_schema(&pool).await.map_err(|e| {
            HarvestError::StoreCorrupt(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog = Self { pool };
        catalog.verify().await?;
        Ok(catalog)
    }

    /// Check database integrity and that every persisted status parses.
    pub async fn verify(&self) -> Result<()> {
        let check: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HarvestError::StoreCorrupt(e.to_string()))?;
        if check != "ok" {
            return Err(HarvestError::StoreCorrupt(format!(
                "integrity check failed: {}",
                check
            )));
        }

        let bad: Option<(String, String)> = sqlx::query_as(
            "SELECT source_id, status FROM catalog \
             WHERE status NOT IN ('pending', 'fetched', 'extracted', 'failed') LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarvestError::StoreCorrupt(e.to_string()))?;
        if let Some((source_id, status)) = bad {
            return Err(HarvestError::StoreCorrupt(format!(
                "entry '{}' has unknown status '{}'",
                source_id, status
            )));
        }
        Ok(())
    }

    /// True when the document reached a terminal status and needs no work.
    pub async fn has(&self, source_id: &str) -> Result<bool> {
        Ok(self
            .get(source_id)
            .await?
            .map(|entry| entry.status.is_terminal())
            .unwrap_or(false))
    }

    pub async fn get(&self, source_id: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query(SELECT_ENTRY_WHERE_ID)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// Insert a newly discovered reference as `pending`.
    ///
    /// Returns `false` when the `source_id` is already known; the existing
    /// row is left untouched.
    pub async fn register(&self, reference: &DocumentReference) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO catalog (source_id, source, url, title, status, discovered_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(source_id) DO NOTHING
            "#,
        )
        .bind(&reference.source_id)
        .bind(&reference.source)
        .bind(&reference.url)
        .bind(&reference.title)
        .bind(reference.discovered_at.timestamp())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move an entry to `status` if the transition is forward.
    ///
    /// Returns whether the row changed. A refused transition is logged and
    /// reported as `false`, never applied.
    pub async fn mark(&self, source_id: &str, status: Status) -> Result<bool> {
        let sql = format!(
            "UPDATE catalog SET status = ?, updated_at = ? WHERE source_id = ? AND status IN ({})",
            predecessor_list(status)
        );
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        self.check_transition(source_id, status, result.rows_affected())
            .await
    }

    /// Record a completed download.
    pub async fn mark_fetched(&self, doc: &StoredDocument, attempts: u32) -> Result<bool> {
        let sql = format!(
            "UPDATE catalog SET status = 'fetched', content_hash = ?, storage_path = ?, \
             byte_size = ?, content_type = ?, attempts = attempts + ?, last_error = NULL, \
             error_kind = NULL, updated_at = ? WHERE source_id = ? AND status IN ({})",
            predecessor_list(Status::Fetched)
        );
        let result = sqlx::query(&sql)
            .bind(&doc.content_hash)
            .bind(doc.storage_path.to_string_lossy().to_string())
            .bind(doc.byte_size as i64)
            .bind(&doc.content_type)
            .bind(attempts as i64)
            .bind(chrono::Utc::now().timestamp())
            .bind(&doc.source_id)
            .execute(&self.pool)
            .await?;
        self.check_transition(&doc.source_id, Status::Fetched, result.rows_affected())
            .await
    }

    pub async fn mark_extracted(&self, source_id: &str, attempts: u32) -> Result<bool> {
        let sql = format!(
            "UPDATE catalog SET status = 'extracted', attempts = attempts + ?, updated_at = ? \
             WHERE source_id = ? AND status IN ({})",
            predecessor_list(Status::Extracted)
        );
        let result = sqlx::query(&sql)
            .bind(attempts as i64)
            .bind(chrono::Utc::now().timestamp())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        self.check_transition(source_id, Status::Extracted, result.rows_affected())
            .await
    }

    /// Move an entry to the absorbing `failed` status with its last error.
    pub async fn mark_failed(
        &self,
        source_id: &str,
        error: &HarvestError,
        attempts: u32,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE catalog SET status = 'failed', last_error = ?, error_kind = ?, \
             attempts = attempts + ?, updated_at = ? WHERE source_id = ? AND status IN ({})",
            predecessor_list(Status::Failed)
        );
        let result = sqlx::query(&sql)
            .bind(error.to_string())
            .bind(error.kind().as_str())
            .bind(attempts as i64)
            .bind(chrono::Utc::now().timestamp())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        self.check_transition(source_id, Status::Failed, result.rows_affected())
            .await
    }

    async fn check_transition(&self, source_id: &str, to: Status, changed: u64) -> Result<bool> {
        if changed == 1 {
            debug!(source_id, status = %to, "catalog transition");
            return Ok(true);
        }
        match self.get(source_id).await? {
            Some(entry) => warn!(
                source_id,
                from = %entry.status,
                to = %to,
                "refused backward catalog transition"
            ),
            None => warn!(source_id, to = %to, "transition for unknown catalog entry"),
        }
        Ok(false)
    }

    /// Non-terminal entries, oldest first: the work a run still owes.
    pub async fn worklist(&self, sources: &[String]) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(
            "SELECT source_id, source, url, title, status, content_hash, storage_path, byte_size, \
             content_type, attempts, last_error, error_kind, discovered_at, updated_at FROM catalog \
             WHERE status IN ('pending', 'fetched') ORDER BY discovered_at, source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = entry_from_row(row)?;
            if sources.is_empty() || sources.contains(&entry.source) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(
            "SELECT source_id, source, url, title, status, content_hash, storage_path, byte_size, \
             content_type, attempts, last_error, error_kind, discovered_at, updated_at FROM catalog \
             ORDER BY source, source_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn counts(&self) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query(
            "SELECT source, status, COUNT(*) AS n FROM catalog GROUP BY source, status \
             ORDER BY source, status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.get("status");
            counts.push(StatusCount {
                source: row.get("source"),
                status: status.parse().map_err(HarvestError::StoreCorrupt)?,
                count: row.get("n"),
            });
        }
        Ok(counts)
    }

    /// Forget `failed` entries so the next run rediscovers and retries them.
    ///
    /// Rows are removed rather than rewound, so no status ever moves
    /// backward.
    pub async fn requeue_failed(&self, sources: &[String]) -> Result<u64> {
        let mut removed = 0;
        if sources.is_empty() {
            removed = sqlx::query("DELETE FROM catalog WHERE status = 'failed'")
                .execute(&self.pool)
                .await?
                .rows_affected();
        } else {
            for source in sources {
                removed += sqlx::query("DELETE FROM catalog WHERE status = 'failed' AND source = ?")
                    .bind(source)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }
        }
        Ok(removed)
    }

    pub async fn get_checkpoint(&self, source: &str) -> Result<Option<u32>> {
        let result: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result.and_then(|s| s.parse::<u32>().ok()))
    }

    pub async fn set_checkpoint(&self, source: &str, cursor: u32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(source)
        .bind(cursor.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn clear_checkpoint(&self, source: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE source = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Checkpoints of listings that are still unfinished, with their update time.
    pub async fn checkpoints(&self) -> Result<Vec<(String, u32, i64)>> {
        let rows = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints ORDER BY source")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let cursor: String = row.get("cursor");
                Some((row.get("source"), cursor.parse().ok()?, row.get("updated_at")))
            })
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const SELECT_ENTRY_WHERE_ID: &str = "SELECT source_id, source, url, title, status, content_hash, \
     storage_path, byte_size, content_type, attempts, last_error, error_kind, discovered_at, updated_at \
     FROM catalog WHERE source_id = ?";

fn predecessor_list(status: Status) -> String {
    status
        .predecessors()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry> {
    let status: String = row.get("status");
    let storage_path: Option<String> = row.get("storage_path");
    let byte_size: Option<i64> = row.get("byte_size");
    let attempts: i64 = row.get("attempts");
    Ok(CatalogEntry {
        source_id: row.get("source_id"),
        source: row.get("source"),
        url: row.get("url"),
        title: row.get("title"),
        status: status.parse().map_err(HarvestError::StoreCorrupt)?,
        content_hash: row.get("content_hash"),
        storage_path: storage_path.map(PathBuf::from),
        byte_size: byte_size.map(|n| n.max(0) as u64),
        content_type: row.get("content_type"),
        attempts: attempts.max(0) as u32,
        last_error: row.get("last_error"),
        error_kind: row.get("error_kind"),
        discovered_at: row.get("discovered_at"),
        updated_at: row.get("updated_at"),
    })
}
