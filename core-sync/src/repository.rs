//! # Sync Log Repository
//!
//! Persists one [`SyncLog`] per pass so hosts can show sync history. Entries
//! are stored as a JSON array on the log row.

use crate::{
    state::SyncState,
    sync_log::{SyncLog, SyncLogEntry, SyncLogId},
    Result, SyncError,
};
use async_trait::async_trait;
use core_ledger::AccountId;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// Repository trait for sync log persistence
#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, log: &SyncLog) -> Result<()>;

    async fn find_by_id(&self, id: &SyncLogId) -> Result<Option<SyncLog>>;

    /// Most recent passes first
    async fn history(&self, account_id: &AccountId, limit: u32) -> Result<Vec<SyncLog>>;

    async fn latest(&self, account_id: &AccountId) -> Result<Option<SyncLog>>;

    /// Keep only the newest `keep` logs for an account, returning how many
    /// were deleted
    async fn prune(&self, account_id: &AccountId, keep: u32) -> Result<u64>;
}

/// SQLite implementation of [`SyncLogRepository`]
pub struct SqliteSyncLogRepository {
    pool: SqlitePool,
}

impl SqliteSyncLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncLogRow {
    id: String,
    account_id: String,
    state: String,
    full_listing: i64,
    entries: String,
    message: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<SyncLogRow> for SyncLog {
    type Error = SyncError;

    fn try_from(row: SyncLogRow) -> Result<Self> {
        let entries: Vec<SyncLogEntry> = serde_json::from_str(&row.entries)
            .map_err(|e| SyncError::Database(format!("Invalid log entries: {}", e)))?;

        Ok(SyncLog {
            id: SyncLogId::from_string(&row.id)
                .map_err(|e| SyncError::Database(format!("Invalid log id: {}", e)))?,
            account_id: AccountId::from_string(&row.account_id)
                .map_err(|e| SyncError::Database(format!("Invalid account id: {}", e)))?,
            state: row.state.parse::<SyncState>()?,
            full_listing: row.full_listing != 0,
            entries,
            message: row.message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

const LOG_COLUMNS: &str =
    "id, account_id, state, full_listing, entries, message, started_at, finished_at";

#[async_trait]
impl SyncLogRepository for SqliteSyncLogRepository {
    async fn insert(&self, log: &SyncLog) -> Result<()> {
        let entries = serde_json::to_string(&log.entries)
            .map_err(|e| SyncError::Database(format!("Failed to encode log entries: {}", e)))?;

        sqlx::query(&format!(
            "INSERT INTO sync_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            LOG_COLUMNS
        ))
        .bind(log.id.to_string())
        .bind(log.account_id.to_string())
        .bind(log.state.as_str())
        .bind(log.full_listing as i64)
        .bind(entries)
        .bind(&log.message)
        .bind(log.started_at)
        .bind(log.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncLogId) -> Result<Option<SyncLog>> {
        let row = sqlx::query_as::<_, SyncLogRow>(&format!(
            "SELECT {} FROM sync_logs WHERE id = ?",
            LOG_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncLog::try_from).transpose()
    }

    async fn history(&self, account_id: &AccountId, limit: u32) -> Result<Vec<SyncLog>> {
        let rows = sqlx::query_as::<_, SyncLogRow>(&format!(
            "SELECT {} FROM sync_logs WHERE account_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT ?",
            LOG_COLUMNS
        ))
        .bind(account_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncLog::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn latest(&self, account_id: &AccountId) -> Result<Option<SyncLog>> {
        Ok(self.history(account_id, 1).await?.into_iter().next())
    }

    async fn prune(&self, account_id: &AccountId, keep: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_logs
            WHERE account_id = ?
              AND id NOT IN (
                  SELECT id FROM sync_logs
                  WHERE account_id = ?
                  ORDER BY started_at DESC, rowid DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(account_id.to_string())
        .bind(account_id.to_string())
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(account_id = %account_id, deleted, "Pruned sync history");
        }
        Ok(deleted)
    }
}
