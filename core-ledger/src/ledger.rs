//! # Change Ledger
//!
//! Durable per-file and per-account sync state.
//!
//! Reconciliation results are written through [`Ledger::apply_batch`], which
//! commits facet refreshes, inserts, deletes and the account's new cursor in
//! one transaction. Individual operations commit through the single-record
//! methods.

use crate::error::{LedgerError, Result};
use crate::models::{AccountId, ChangeFlag, FileRecord, FileRecordId, ProviderAccount};
use async_trait::async_trait;
use bridge_traits::ProviderKind;
use core_runtime::config::SyncFrequency;
use sqlx::{FromRow, Sqlite, SqlitePool};
use tracing::debug;

/// What a batch does to the account's sync cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CursorUpdate {
    #[default]
    Unchanged,
    Set(Option<String>),
}

/// Ledger mutations produced by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    pub inserts: Vec<FileRecord>,
    pub updates: Vec<FileRecord>,
    pub deletes: Vec<FileRecordId>,
    pub cursor: CursorUpdate,
}

impl LedgerBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.cursor == CursorUpdate::Unchanged
    }
}

/// Transactional access to accounts and file records
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn insert_account(&self, account: &ProviderAccount) -> Result<()>;

    /// # Errors
    ///
    /// `NotFound` if the account does not exist
    async fn update_account(&self, account: &ProviderAccount) -> Result<()>;

    async fn find_account(&self, id: &AccountId) -> Result<Option<ProviderAccount>>;

    async fn list_accounts(&self) -> Result<Vec<ProviderAccount>>;

    /// Delete an account and (by cascade) its records and sync logs
    ///
    /// Returns `false` if the account did not exist.
    async fn delete_account(&self, id: &AccountId) -> Result<bool>;

    /// # Errors
    ///
    /// `InvalidInput` if the record is anchored on neither side
    async fn insert_file(&self, record: &FileRecord) -> Result<()>;

    /// # Errors
    ///
    /// `NotFound` if the record does not exist, `InvalidInput` if the record is
    /// anchored on neither side
    async fn update_file(&self, record: &FileRecord) -> Result<()>;

    /// Returns `false` if the record did not exist.
    async fn delete_file(&self, id: &FileRecordId) -> Result<bool>;

    async fn find_file(&self, id: &FileRecordId) -> Result<Option<FileRecord>>;

    async fn find_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &str,
    ) -> Result<Option<FileRecord>>;

    /// All records of one account, in a stable order
    async fn files_for_account(&self, account_id: &AccountId) -> Result<Vec<FileRecord>>;

    /// Records with a pending local add or modification
    async fn pending_uploads(&self, account_id: &AccountId) -> Result<Vec<FileRecord>>;

    /// Apply all mutations of a batch atomically
    async fn apply_batch(&self, account_id: &AccountId, batch: &LedgerBatch) -> Result<()>;
}

/// SQLite implementation of [`Ledger`]
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn validate(record: &FileRecord) -> Result<()> {
        record
            .validate()
            .map_err(|msg| LedgerError::invalid("FileRecord", msg))
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: String,
    provider: String,
    identity: String,
    display_name: String,
    sync_cursor: Option<String>,
    sync_frequency: String,
    last_sync_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<AccountRow> for ProviderAccount {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self> {
        let id = AccountId::from_string(&row.id)
            .map_err(|e| LedgerError::invalid("account.id", e.to_string()))?;
        let provider = ProviderKind::parse(&row.provider).ok_or_else(|| {
            LedgerError::invalid("account.provider", format!("unknown provider: {}", row.provider))
        })?;
        let sync_frequency = SyncFrequency::parse(&row.sync_frequency).ok_or_else(|| {
            LedgerError::invalid(
                "account.sync_frequency",
                format!("unknown frequency: {}", row.sync_frequency),
            )
        })?;

        Ok(ProviderAccount {
            id,
            provider,
            identity: row.identity,
            display_name: row.display_name,
            sync_cursor: row.sync_cursor,
            sync_frequency,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FileRecordRow {
    id: String,
    account_id: String,
    local_title: Option<String>,
    local_file: Option<String>,
    local_folder: Option<String>,
    local_modified_at: Option<i64>,
    local_change: String,
    remote_id: Option<String>,
    remote_title: Option<String>,
    remote_folder: Option<String>,
    remote_modified_at: Option<i64>,
    remote_hash: Option<String>,
    remote_change: String,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = LedgerError;

    fn try_from(row: FileRecordRow) -> Result<Self> {
        Ok(FileRecord {
            id: FileRecordId::from_string(&row.id)
                .map_err(|e| LedgerError::invalid("file.id", e.to_string()))?,
            account_id: AccountId::from_string(&row.account_id)
                .map_err(|e| LedgerError::invalid("file.account_id", e.to_string()))?,
            local_title: row.local_title,
            local_file: row.local_file,
            local_folder: row.local_folder,
            local_modified_at: row.local_modified_at,
            local_change: row.local_change.parse::<ChangeFlag>()?,
            remote_id: row.remote_id,
            remote_title: row.remote_title,
            remote_folder: row.remote_folder,
            remote_modified_at: row.remote_modified_at,
            remote_hash: row.remote_hash,
            remote_change: row.remote_change.parse::<ChangeFlag>()?,
        })
    }
}

const FILE_COLUMNS: &str = "id, account_id, \
     local_title, local_file, local_folder, local_modified_at, local_change, \
     remote_id, remote_title, remote_folder, remote_modified_at, remote_hash, remote_change";

const ACCOUNT_COLUMNS: &str =
    "id, provider, identity, display_name, sync_cursor, sync_frequency, last_sync_at, created_at";

async fn insert_file_with<'e, E>(executor: E, record: &FileRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO file_records (
            id, account_id,
            local_title, local_file, local_folder, local_modified_at, local_change,
            remote_id, remote_title, remote_folder, remote_modified_at, remote_hash, remote_change
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.account_id.to_string())
    .bind(&record.local_title)
    .bind(&record.local_file)
    .bind(&record.local_folder)
    .bind(record.local_modified_at)
    .bind(record.local_change.as_str())
    .bind(&record.remote_id)
    .bind(&record.remote_title)
    .bind(&record.remote_folder)
    .bind(record.remote_modified_at)
    .bind(&record.remote_hash)
    .bind(record.remote_change.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

async fn update_file_with<'e, E>(executor: E, record: &FileRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE file_records SET
            local_title = ?, local_file = ?, local_folder = ?, local_modified_at = ?,
            local_change = ?,
            remote_id = ?, remote_title = ?, remote_folder = ?, remote_modified_at = ?,
            remote_hash = ?, remote_change = ?
        WHERE id = ?
        "#,
    )
    .bind(&record.local_title)
    .bind(&record.local_file)
    .bind(&record.local_folder)
    .bind(record.local_modified_at)
    .bind(record.local_change.as_str())
    .bind(&record.remote_id)
    .bind(&record.remote_title)
    .bind(&record.remote_folder)
    .bind(record.remote_modified_at)
    .bind(&record.remote_hash)
    .bind(record.remote_change.as_str())
    .bind(record.id.to_string())
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound {
            entity_type: "FileRecord".to_string(),
            id: record.id.to_string(),
        });
    }
    Ok(())
}

async fn delete_file_with<'e, E>(executor: E, id: &FileRecordId) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM file_records WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn insert_account(&self, account: &ProviderAccount) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO provider_accounts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ACCOUNT_COLUMNS
        ))
        .bind(account.id.to_string())
        .bind(account.provider.as_str())
        .bind(&account.identity)
        .bind(&account.display_name)
        .bind(&account.sync_cursor)
        .bind(account.sync_frequency.as_str())
        .bind(account.last_sync_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        debug!(account_id = %account.id, provider = %account.provider, "Inserted account");
        Ok(())
    }

    async fn update_account(&self, account: &ProviderAccount) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provider_accounts SET
                display_name = ?, sync_cursor = ?, sync_frequency = ?, last_sync_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.display_name)
        .bind(&account.sync_cursor)
        .bind(account.sync_frequency.as_str())
        .bind(account.last_sync_at)
        .bind(account.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                entity_type: "ProviderAccount".to_string(),
                id: account.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_account(&self, id: &AccountId) -> Result<Option<ProviderAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM provider_accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProviderAccount::try_from).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<ProviderAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM provider_accounts ORDER BY created_at ASC, id ASC",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProviderAccount::try_from).collect()
    }

    async fn delete_account(&self, id: &AccountId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM provider_accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_file(&self, record: &FileRecord) -> Result<()> {
        Self::validate(record)?;
        insert_file_with(&self.pool, record).await
    }

    async fn update_file(&self, record: &FileRecord) -> Result<()> {
        Self::validate(record)?;
        update_file_with(&self.pool, record).await
    }

    async fn delete_file(&self, id: &FileRecordId) -> Result<bool> {
        delete_file_with(&self.pool, id).await
    }

    async fn find_file(&self, id: &FileRecordId) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE id = ?",
            FILE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn find_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE account_id = ? AND remote_id = ?",
            FILE_COLUMNS
        ))
        .bind(account_id.to_string())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn files_for_account(&self, account_id: &AccountId) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE account_id = ? ORDER BY id ASC",
            FILE_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn pending_uploads(&self, account_id: &AccountId) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records \
             WHERE account_id = ? AND local_change IN ('added', 'modified') AND local_file IS NOT NULL \
             ORDER BY id ASC",
            FILE_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn apply_batch(&self, account_id: &AccountId, batch: &LedgerBatch) -> Result<()> {
        for record in batch.inserts.iter().chain(batch.updates.iter()) {
            Self::validate(record)?;
            if record.account_id != *account_id {
                return Err(LedgerError::invalid(
                    "FileRecord.account_id",
                    format!("record {} belongs to another account", record.id),
                ));
            }
        }

        let mut tx = self.pool.begin().await?;

        // Deletes first so a re-inserted remote id never collides with the
        // unique (account_id, remote_id) index.
        for id in &batch.deletes {
            delete_file_with(&mut *tx, id).await?;
        }
        for record in &batch.updates {
            update_file_with(&mut *tx, record).await?;
        }
        for record in &batch.inserts {
            insert_file_with(&mut *tx, record).await?;
        }

        if let CursorUpdate::Set(cursor) = &batch.cursor {
            let result = sqlx::query("UPDATE provider_accounts SET sync_cursor = ? WHERE id = ?")
                .bind(cursor)
                .bind(account_id.to_string())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LedgerError::NotFound {
                    entity_type: "ProviderAccount".to_string(),
                    id: account_id.to_string(),
                });
            }
        }

        tx.commit().await?;

        debug!(
            account_id = %account_id,
            inserts = batch.inserts.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            "Applied ledger batch"
        );
        Ok(())
    }
}
