//! Sync service façade
//!
//! Owns the ledger, the syncer and the per-account remote stores, and exposes
//! the operations a host application needs: account management, the editing
//! path and sync triggers.

use crate::scheduler::Scheduler;
use crate::{Result, ServiceError};
use bridge_traits::{LocalFileCache, ProviderKind, RemoteStore};
use bytes::Bytes;
use core_ledger::{
    create_pool, AccountId, ChangeFlag, DatabaseConfig, FileRecord, FileRecordId, Ledger,
    ProviderAccount, SqliteLedger,
};
use core_runtime::config::{CoreConfig, SyncFrequency};
use core_runtime::events::{CoreEvent, EventBus, EventStream, FileChangeKind, LedgerEvent};
use core_sync::{
    cache_file_name, SqliteSyncLogRepository, SyncConfig, SyncError, SyncLog, SyncLogRepository,
    Syncer,
};
use futures::future::join_all;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Builder for [`SyncService`]
pub struct SyncServiceBuilder {
    config: CoreConfig,
    event_bus: Option<EventBus>,
    pool: Option<SqlitePool>,
}

impl SyncServiceBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            event_bus: None,
            pool: None,
        }
    }

    /// Share an existing event bus with the host
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Use an already opened ledger database instead of `database_path`
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub async fn build(self) -> Result<SyncService> {
        let config = self.config;
        config.validate()?;

        let pool = match self.pool {
            Some(pool) => pool,
            None => create_pool(DatabaseConfig::new(config.database_path.clone())).await?,
        };
        let event_bus = self.event_bus.unwrap_or_default();
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::new(pool.clone()));

        let history: Option<Arc<dyn SyncLogRepository>> = if config.features.enable_sync_history {
            Some(Arc::new(SqliteSyncLogRepository::new(pool)))
        } else {
            None
        };

        let mut syncer = Syncer::new(
            SyncConfig::from(&config.sync),
            ledger.clone(),
            config.local_cache.clone(),
            event_bus.clone(),
            config.clock.clone(),
        );
        if let Some(history) = &history {
            syncer = syncer.with_history(history.clone());
        }

        info!(
            database = %config.database_path.display(),
            history = config.features.enable_sync_history,
            "Sync service ready"
        );

        Ok(SyncService {
            inner: Arc::new(Inner {
                config,
                ledger,
                syncer,
                history,
                event_bus,
                stores: RwLock::new(HashMap::new()),
                scheduler: StdMutex::new(None),
            }),
        })
    }
}

pub(crate) struct Inner {
    config: CoreConfig,
    ledger: Arc<dyn Ledger>,
    syncer: Syncer,
    history: Option<Arc<dyn SyncLogRepository>>,
    event_bus: EventBus,
    stores: RwLock<HashMap<AccountId, Arc<dyn RemoteStore>>>,
    pub(crate) scheduler: StdMutex<Option<Scheduler>>,
}

/// Primary façade exposed to host applications
#[derive(Clone)]
pub struct SyncService {
    pub(crate) inner: Arc<Inner>,
}

impl SyncService {
    pub fn builder(config: CoreConfig) -> SyncServiceBuilder {
        SyncServiceBuilder::new(config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.inner.ledger
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.event_bus.subscribe())
    }

    fn cache(&self) -> &Arc<dyn LocalFileCache> {
        &self.inner.config.local_cache
    }

    fn now(&self) -> i64 {
        self.inner.config.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: LedgerEvent) {
        self.inner.event_bus.emit(CoreEvent::Ledger(event)).ok();
    }

    fn store_for(&self, account_id: &AccountId) -> Option<Arc<dyn RemoteStore>> {
        self.inner
            .stores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .cloned()
    }

    fn require_store(&self, account_id: &AccountId) -> Result<Arc<dyn RemoteStore>> {
        self.store_for(account_id)
            .ok_or_else(|| ServiceError::StoreNotAttached(account_id.to_string()))
    }

    async fn require_account(&self, account_id: &AccountId) -> Result<ProviderAccount> {
        self.inner
            .ledger
            .find_account(account_id)
            .await?
            .ok_or_else(|| ServiceError::AccountNotFound(account_id.to_string()))
    }

    async fn require_file(&self, record_id: &FileRecordId) -> Result<FileRecord> {
        self.inner
            .ledger
            .find_file(record_id)
            .await?
            .ok_or_else(|| ServiceError::RecordNotFound(record_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Register a new account backed by `store`
    #[instrument(skip(self, store))]
    pub async fn add_account(
        &self,
        provider: ProviderKind,
        identity: &str,
        display_name: &str,
        store: Arc<dyn RemoteStore>,
    ) -> Result<ProviderAccount> {
        let account = ProviderAccount::new(
            provider,
            identity,
            display_name,
            self.inner.config.sync.default_frequency,
            self.now(),
        );
        self.inner.ledger.insert_account(&account).await?;
        self.inner
            .stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account.id, store);

        info!(account_id = %account.id, provider = %provider, "Account added");
        self.emit(LedgerEvent::AccountAdded {
            account_id: account.id.to_string(),
            provider: provider.as_str().to_string(),
        });
        self.schedule_if_running(account.id);
        Ok(account)
    }

    /// Supply the remote store of an account loaded from the ledger
    pub async fn attach_store(&self, account_id: AccountId, store: Arc<dyn RemoteStore>) -> Result<()> {
        self.require_account(&account_id).await?;
        self.inner
            .stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id, store);
        self.schedule_if_running(account_id);
        Ok(())
    }

    pub async fn accounts(&self) -> Result<Vec<ProviderAccount>> {
        Ok(self.inner.ledger.list_accounts().await?)
    }

    /// Remove an account, its records, its history and its cached files
    ///
    /// A running pass is cancelled and awaited first.
    #[instrument(skip(self))]
    pub async fn remove_account(&self, account_id: AccountId) -> Result<bool> {
        self.inner.syncer.cancel(&account_id);
        let _lock = self.inner.syncer.lock_account(account_id).await;

        let records = self.inner.ledger.files_for_account(&account_id).await?;
        if !self.inner.ledger.delete_account(&account_id).await? {
            return Ok(false);
        }

        for local_file in records.iter().filter_map(|r| r.local_file.as_deref()) {
            if let Err(e) = self.cache().delete(local_file).await {
                warn!(file = local_file, error = %e, "Failed to delete cached file");
            }
        }
        self.inner
            .stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&account_id);
        self.unschedule(&account_id);

        info!(account_id = %account_id, files = records.len(), "Account removed");
        self.emit(LedgerEvent::AccountRemoved {
            account_id: account_id.to_string(),
        });
        Ok(true)
    }

    pub async fn set_sync_frequency(&self, account_id: AccountId, frequency: SyncFrequency) -> Result<()> {
        let _lock = self.inner.syncer.lock_account(account_id).await;
        let mut account = self.require_account(&account_id).await?;
        account.sync_frequency = frequency;
        self.inner.ledger.update_account(&account).await?;
        debug!(account_id = %account_id, frequency = %frequency, "Sync frequency changed");
        Ok(())
    }

    /// Forget the change-feed cursor so the next pass lists everything
    pub async fn reset_cursor(&self, account_id: AccountId) -> Result<()> {
        let _lock = self.inner.syncer.lock_account(account_id).await;
        let mut account = self.require_account(&account_id).await?;
        account.sync_cursor = None;
        self.inner.ledger.update_account(&account).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Editing path
    // ------------------------------------------------------------------

    pub async fn files(&self, account_id: AccountId) -> Result<Vec<FileRecord>> {
        Ok(self.inner.ledger.files_for_account(&account_id).await?)
    }

    /// Contents of a record's local replica
    pub async fn read_local_file(&self, record_id: FileRecordId) -> Result<Bytes> {
        let record = self.require_file(&record_id).await?;
        let local_file = record.local_file.ok_or_else(|| {
            ServiceError::InvalidOperation(format!("{} has not been downloaded yet", record_id))
        })?;
        Ok(self.cache().read(&local_file).await?)
    }

    /// Create a new password file and upload it right away
    ///
    /// A failed upload leaves the record pending; it is retried before the
    /// next scheduled pass.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn create_local_file(
        &self,
        account_id: AccountId,
        title: &str,
        folder: &str,
        data: Bytes,
    ) -> Result<FileRecord> {
        if title.trim().is_empty() || title.contains('/') {
            return Err(ServiceError::InvalidOperation(format!(
                "invalid file title {:?}",
                title
            )));
        }

        let record_id = {
            let _lock = self.inner.syncer.lock_account(account_id).await;
            self.require_account(&account_id).await?;

            let mut record = FileRecord::new_local(account_id, title, folder, String::new(), self.now());
            let local_file = cache_file_name(&record.id, 0, title);
            self.cache().write(&local_file, data).await?;
            record.local_file = Some(local_file);

            if let Err(e) = self.inner.ledger.insert_file(&record).await {
                if let Some(local_file) = &record.local_file {
                    self.cache().delete(local_file).await.ok();
                }
                return Err(e.into());
            }
            self.emit(LedgerEvent::FileChanged {
                account_id: account_id.to_string(),
                record_id: record.id.to_string(),
                kind: FileChangeKind::Created,
            });
            record.id
        };

        self.upload_now(account_id, record_id).await;
        self.require_file(&record_id).await
    }

    /// Overwrite a record's local replica and upload it right away
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn save_local_file(&self, record_id: FileRecordId, data: Bytes) -> Result<FileRecord> {
        let account_id = self.require_file(&record_id).await?.account_id;
        {
            let _lock = self.inner.syncer.lock_account(account_id).await;
            let mut record = self.require_file(&record_id).await?;
            if record.local_deleted() {
                return Err(ServiceError::InvalidOperation(format!(
                    "{} is pending removal",
                    record_id
                )));
            }

            let local_file = match &record.local_file {
                Some(local_file) => local_file.clone(),
                None => cache_file_name(&record.id, 0, record.title()),
            };
            self.cache().write(&local_file, data).await?;

            if record.local_title.is_none() {
                record.local_title = record.remote_title.clone();
                record.local_folder = record.remote_folder.clone();
            }
            record.local_file = Some(local_file);
            record.local_modified_at = Some(self.now());
            if record.local_change != ChangeFlag::Added {
                record.local_change = ChangeFlag::Modified;
            }
            self.inner.ledger.update_file(&record).await?;

            self.emit(LedgerEvent::FileChanged {
                account_id: account_id.to_string(),
                record_id: record_id.to_string(),
                kind: FileChangeKind::Saved,
            });
        }

        self.upload_now(account_id, record_id).await;
        self.require_file(&record_id).await
    }

    /// Mark a record for removal; the next pass deletes both replicas
    ///
    /// A file that never reached the remote store is dropped immediately.
    #[instrument(skip(self))]
    pub async fn delete_local_file(&self, record_id: FileRecordId) -> Result<()> {
        let account_id = self.require_file(&record_id).await?.account_id;
        let _lock = self.inner.syncer.lock_account(account_id).await;
        let mut record = self.require_file(&record_id).await?;

        if record.remote_id.is_none() {
            if let Some(local_file) = &record.local_file {
                self.cache().delete(local_file).await?;
            }
            self.inner.ledger.delete_file(&record_id).await?;
        } else {
            record.local_change = ChangeFlag::Removed;
            self.inner.ledger.update_file(&record).await?;
        }

        self.emit(LedgerEvent::FileChanged {
            account_id: account_id.to_string(),
            record_id: record_id.to_string(),
            kind: FileChangeKind::Deleted,
        });
        Ok(())
    }

    async fn upload_now(&self, account_id: AccountId, record_id: FileRecordId) {
        let Some(store) = self.store_for(&account_id) else {
            debug!(record_id = %record_id, "No remote store attached; upload stays pending");
            return;
        };
        if let Err(e) = self.inner.syncer.upload_local(record_id, store).await {
            warn!(record_id = %record_id, error = %e, "Upload failed; will retry before next sync");
        }
    }

    /// Retry uploads that failed on the editing path
    ///
    /// Returns the number of records uploaded.
    #[instrument(skip(self))]
    pub async fn flush_pending_uploads(&self, account_id: AccountId) -> Result<usize> {
        let store = self.require_store(&account_id)?;
        let pending = self.inner.ledger.pending_uploads(&account_id).await?;

        let mut uploaded = 0;
        for record in pending {
            match self.inner.syncer.upload_local(record.id, store.clone()).await {
                Ok(Some(_)) => uploaded += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Pending upload failed");
                }
            }
        }
        if uploaded > 0 {
            info!(account_id = %account_id, uploaded, "Flushed pending uploads");
        }
        Ok(uploaded)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    pub async fn sync_account(&self, account_id: AccountId) -> Result<SyncLog> {
        self.sync_account_with_token(account_id, CancellationToken::new())
            .await
    }

    pub(crate) async fn sync_account_with_token(
        &self,
        account_id: AccountId,
        token: CancellationToken,
    ) -> Result<SyncLog> {
        let store = self.require_store(&account_id)?;
        if self.inner.config.features.flush_pending_before_sync && !self.inner.syncer.is_syncing(&account_id) {
            if let Err(e) = self.flush_pending_uploads(account_id).await {
                warn!(account_id = %account_id, error = %e, "Could not flush pending uploads");
            }
        }
        Ok(self
            .inner
            .syncer
            .sync_account_with_token(account_id, store, token)
            .await?)
    }

    /// Sync every account with an attached store, concurrently
    pub async fn sync_all(&self) -> Result<Vec<(AccountId, Result<SyncLog>)>> {
        let accounts = self.inner.ledger.list_accounts().await?;
        let passes = accounts
            .iter()
            .filter(|account| self.store_for(&account.id).is_some())
            .map(|account| async move { (account.id, self.sync_account(account.id).await) });
        Ok(join_all(passes).await)
    }

    pub fn cancel_sync(&self, account_id: &AccountId) -> bool {
        self.inner.syncer.cancel(account_id)
    }

    pub fn is_syncing(&self, account_id: &AccountId) -> bool {
        self.inner.syncer.is_syncing(account_id)
    }

    /// Newest sync logs first; empty when history is disabled
    pub async fn history(&self, account_id: AccountId, limit: u32) -> Result<Vec<SyncLog>> {
        match &self.inner.history {
            Some(history) => Ok(history.history(&account_id, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn is_sync_in_progress(error: &ServiceError) -> bool {
        matches!(error, ServiceError::Sync(SyncError::SyncInProgress { .. }))
    }
}
