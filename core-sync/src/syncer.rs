//! # Syncer
//!
//! Drives one sync pass for one account:
//!
//! 1. **Authorize**: an unauthorized store ends the pass in `PendingAuth`
//!    before any network call.
//! 2. **List** through a [`RemoteListingAdapter`] from the stored cursor. A
//!    failure ends the pass in `Failed` with the cursor untouched.
//! 3. **Reconcile** and apply the resulting [`LedgerBatch`] (remote facets,
//!    new records, the new cursor) in one ledger transaction.
//! 4. **Execute** the planned operations with bounded concurrency. Each
//!    operation's failure is logged and isolated; cancellation is checked
//!    before each operation starts.
//!
//! Passes for different accounts may run concurrently. A second pass for an
//! account that is already syncing is rejected with `SyncInProgress`.
//!
//! [`LedgerBatch`]: core_ledger::LedgerBatch

use crate::listing::{FileFilter, RemoteListingAdapter, SyncRemoteFiles};
use crate::operation::{OperationContext, OperationOutcome, SyncOperation, Upload};
use crate::reconciler::{reconcile, ReconcilePlan};
use crate::remote_calls::RemoteCalls;
use crate::repository::SyncLogRepository;
use crate::state::SyncState;
use crate::sync_log::{SyncLog, SyncLogEntry};
use crate::{Result, SyncError};
use bridge_traits::{Clock, LocalFileCache, RemoteStore};
use core_ledger::{AccountId, FileRecordId, Ledger, ProviderAccount};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Syncer configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Extensions of files that belong to this application
    pub file_extensions: Vec<String>,
    pub mime_types: Vec<String>,
    /// Bound on every single remote call
    pub network_timeout: Duration,
    /// Operations of one pass running at the same time
    pub max_concurrent_operations: usize,
    pub retry_recoverable_once: bool,
    /// Sync logs kept per account; 0 keeps everything
    pub history_retention: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            file_extensions: settings.file_extensions.clone(),
            mime_types: settings.mime_types.clone(),
            network_timeout: settings.network_timeout,
            max_concurrent_operations: settings.max_concurrent_operations.max(1),
            retry_recoverable_once: settings.retry_recoverable_once,
            history_retention: settings.history_retention,
        }
    }
}

/// Removes an account from the active set when the pass ends
struct ActivePass<'a> {
    active: &'a StdMutex<HashMap<AccountId, CancellationToken>>,
    account_id: AccountId,
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.account_id);
    }
}

pub struct Syncer {
    config: SyncConfig,
    ledger: Arc<dyn Ledger>,
    cache: Arc<dyn LocalFileCache>,
    history: Option<Arc<dyn SyncLogRepository>>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    active: StdMutex<HashMap<AccountId, CancellationToken>>,
    account_locks: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl Syncer {
    pub fn new(
        config: SyncConfig,
        ledger: Arc<dyn Ledger>,
        cache: Arc<dyn LocalFileCache>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            cache,
            history: None,
            event_bus,
            clock,
            active: StdMutex::new(HashMap::new()),
            account_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Persist every pass's log to `history`
    pub fn with_history(mut self, history: Arc<dyn SyncLogRepository>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<dyn LocalFileCache> {
        &self.cache
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn remote_calls(&self, store: Arc<dyn RemoteStore>) -> RemoteCalls {
        RemoteCalls::new(
            store,
            self.config.network_timeout,
            self.config.retry_recoverable_once,
        )
    }

    /// Serialize ledger writes for one account
    ///
    /// Held for the whole of a pass; the editing path takes it around its own
    /// record writes.
    pub async fn lock_account(&self, account_id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.account_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(account_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn is_syncing(&self, account_id: &AccountId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(account_id)
    }

    /// Request cancellation of the account's running pass
    ///
    /// Operations already started run to completion. Returns `false` if no
    /// pass is running.
    pub fn cancel(&self, account_id: &AccountId) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(account_id) {
            Some(token) => {
                token.cancel();
                info!(account_id = %account_id, "Sync cancellation requested");
                true
            }
            None => false,
        }
    }

    fn begin(&self, account_id: AccountId, token: CancellationToken) -> Result<ActivePass<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(&account_id) {
            return Err(SyncError::SyncInProgress {
                account_id: account_id.to_string(),
            });
        }
        active.insert(account_id, token);
        Ok(ActivePass {
            active: &self.active,
            account_id,
        })
    }

    /// Run one full sync pass for an account
    ///
    /// Pass-level failures (authorization, listing, reconciliation) are
    /// reported through the returned log's state, not as errors.
    ///
    /// # Errors
    ///
    /// `SyncInProgress` if the account is already syncing, `AccountNotFound`
    /// if it does not exist
    pub async fn sync_account(
        &self,
        account_id: AccountId,
        store: Arc<dyn RemoteStore>,
    ) -> Result<SyncLog> {
        self.sync_account_with_token(account_id, store, CancellationToken::new())
            .await
    }

    /// [`sync_account`](Self::sync_account) with a caller-owned cancellation
    /// token
    #[instrument(skip(self, store, token), fields(account_id = %account_id))]
    pub async fn sync_account_with_token(
        &self,
        account_id: AccountId,
        store: Arc<dyn RemoteStore>,
        token: CancellationToken,
    ) -> Result<SyncLog> {
        let _active = self.begin(account_id, token.clone())?;
        let _lock = self.lock_account(account_id).await;

        let account = self
            .ledger
            .find_account(&account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;

        let mut log = SyncLog::new(account_id, self.now());
        let remote = self.remote_calls(store.clone());

        match remote.is_authorized().await {
            Ok(true) => {}
            Ok(false) => return self.finish_pending_auth(log).await,
            Err(e) if e.is_unauthorized() => return self.finish_pending_auth(log).await,
            Err(e) => return self.finish_failed(log, e).await,
        }

        if token.is_cancelled() {
            log.message = Some("Cancelled before listing".to_string());
            log.transition(SyncState::Cancelled, self.now())?;
            self.emit(SyncEvent::Cancelled {
                pass_id: log.id.to_string(),
                account_id: account_id.to_string(),
                operations_skipped: 0,
            });
            self.persist(&log).await;
            return Ok(log);
        }

        log.transition(SyncState::Listing, self.now())?;
        self.emit(SyncEvent::Started {
            pass_id: log.id.to_string(),
            account_id: account_id.to_string(),
            provider: store.provider_kind().as_str().to_string(),
        });

        let mut adapter = RemoteListingAdapter::new(
            remote.clone(),
            FileFilter::new(&self.config.file_extensions, &self.config.mime_types),
        );
        let snapshot = match adapter
            .list_remote_files(account.sync_cursor.as_deref())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_unauthorized() => return self.finish_pending_auth(log).await,
            Err(e) => return self.finish_failed(log, e).await,
        };
        log.full_listing = snapshot.is_full;

        log.transition(SyncState::Reconciling, self.now())?;
        let plan = match self.reconcile_and_apply(&account, &snapshot).await {
            Ok(plan) => plan,
            Err(e) => return self.finish_failed(log, e).await,
        };

        log.transition(SyncState::Executing, self.now())?;
        let skipped = self
            .execute_operations(&mut log, &plan.operations, &remote, &token)
            .await;

        if skipped > 0 {
            log.message = Some(format!("{} operations skipped", skipped));
            log.transition(SyncState::Cancelled, self.now())?;
            info!(skipped, "Sync pass cancelled");
            self.emit(SyncEvent::Cancelled {
                pass_id: log.id.to_string(),
                account_id: account_id.to_string(),
                operations_skipped: skipped as u64,
            });
        } else {
            log.transition(SyncState::Done, self.now())?;
            self.record_last_sync(&account_id).await;
            info!(
                operations = log.operations(),
                failures = log.failures(),
                conflicts = plan.conflicts,
                "Sync pass completed"
            );
            self.emit(SyncEvent::Completed {
                pass_id: log.id.to_string(),
                account_id: account_id.to_string(),
                operations: log.operations() as u64,
                failures: log.failures() as u64,
                duration_ms: log.duration_millis().unwrap_or(0).max(0) as u64,
            });
        }

        self.persist(&log).await;
        Ok(log)
    }

    async fn reconcile_and_apply(
        &self,
        account: &ProviderAccount,
        snapshot: &SyncRemoteFiles,
    ) -> Result<ReconcilePlan> {
        let records = self.ledger.files_for_account(&account.id).await?;

        let mut missing = HashSet::new();
        for record in &records {
            if let Some(local_file) = &record.local_file {
                match self.cache.exists(local_file).await {
                    Ok(true) => {}
                    Ok(false) => {
                        missing.insert(record.id);
                    }
                    Err(e) => return Err(SyncError::LocalIo(e.to_string())),
                }
            }
        }

        let plan = reconcile(account.id, &records, snapshot, &missing);
        self.ledger.apply_batch(&account.id, &plan.batch).await?;
        Ok(plan)
    }

    /// Run operations, returning how many were skipped by cancellation
    async fn execute_operations(
        &self,
        log: &mut SyncLog,
        operations: &[SyncOperation],
        remote: &RemoteCalls,
        token: &CancellationToken,
    ) -> usize {
        let pass_id = log.id.to_string();
        let account_id = log.account_id.to_string();

        let results: Vec<Option<SyncLogEntry>> = stream::iter(operations)
            .map(|op| {
                let pass_id = &pass_id;
                let account_id = &account_id;
                async move {
                    if token.is_cancelled() {
                        debug!(operation = %op, "Skipping operation after cancellation");
                        return None;
                    }
                    let entry = self.run_operation(op, remote).await;
                    self.emit(SyncEvent::OperationFinished {
                        pass_id: pass_id.clone(),
                        account_id: account_id.clone(),
                        description: entry.description.clone(),
                        success: entry.success,
                    });
                    Some(entry)
                }
            })
            .buffer_unordered(self.config.max_concurrent_operations.max(1))
            .boxed()
            .collect()
            .await;

        let mut skipped = 0;
        for result in results {
            match result {
                Some(entry) => log.push(entry),
                None => skipped += 1,
            }
        }
        skipped
    }

    async fn run_operation(&self, op: &SyncOperation, remote: &RemoteCalls) -> SyncLogEntry {
        let description = op.description();
        let ctx = OperationContext {
            remote,
            cache: self.cache.as_ref(),
        };

        let outcome = match op.execute(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(operation = %description, error = %e, "Operation failed");
                return SyncLogEntry::failure(description, e.to_string());
            }
        };

        match self.commit_with_retry(op, &outcome).await {
            Ok(()) if outcome.succeeded() => SyncLogEntry::success(description),
            Ok(()) => SyncLogEntry::failure(
                description,
                outcome.error().unwrap_or("operation did not complete"),
            ),
            Err(e) => {
                warn!(operation = %description, error = %e, "Failed to record operation");
                op.discard(self.cache.as_ref(), &outcome).await;
                SyncLogEntry::failure(description, e.to_string())
            }
        }
    }

    /// Commit, repeating the ledger write once without repeating the network
    /// call
    async fn commit_with_retry(&self, op: &SyncOperation, outcome: &OperationOutcome) -> Result<()> {
        match op.commit(self.ledger.as_ref(), self.cache.as_ref(), outcome).await {
            Ok(()) => Ok(()),
            Err(e @ SyncError::RecordNotFound(_)) => Err(e),
            Err(e) => {
                warn!(operation = %op, error = %e, "Commit failed; retrying");
                op.commit(self.ledger.as_ref(), self.cache.as_ref(), outcome).await
            }
        }
    }

    /// Upload a record's pending local edit right away
    ///
    /// Returns `Ok(None)` when the record has nothing to upload.
    ///
    /// # Errors
    ///
    /// Transport, cache and ledger failures; the record keeps its pending
    /// change and is retried later
    #[instrument(skip(self, store), fields(record_id = %record_id))]
    pub async fn upload_local(
        &self,
        record_id: FileRecordId,
        store: Arc<dyn RemoteStore>,
    ) -> Result<Option<SyncLogEntry>> {
        let account_id = self
            .ledger
            .find_file(&record_id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound(record_id.to_string()))?
            .account_id;
        let _lock = self.lock_account(account_id).await;

        // Re-read under the lock; a pass may have changed the record.
        let record = self
            .ledger
            .find_file(&record_id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound(record_id.to_string()))?;
        if !record.local_change.is_changed() {
            return Ok(None);
        }
        let upload = Upload::for_record(&record).ok_or_else(|| {
            SyncError::InvalidState(format!("record {} has no local replica", record_id))
        })?;
        let op = SyncOperation::Upload(upload);

        let remote = self.remote_calls(store);
        let ctx = OperationContext {
            remote: &remote,
            cache: self.cache.as_ref(),
        };
        let outcome = op.execute(&ctx).await?;
        self.commit_with_retry(&op, &outcome).await?;

        debug!(operation = %op, "Uploaded local edit");
        Ok(Some(SyncLogEntry::success(op.description())))
    }

    async fn finish_pending_auth(&self, mut log: SyncLog) -> Result<SyncLog> {
        log.message = Some("Account requires authorization".to_string());
        log.transition(SyncState::PendingAuth, self.now())?;
        warn!(account_id = %log.account_id, "Account requires authorization");
        self.emit(SyncEvent::PendingAuth {
            account_id: log.account_id.to_string(),
        });
        self.persist(&log).await;
        Ok(log)
    }

    async fn finish_failed(&self, mut log: SyncLog, error: SyncError) -> Result<SyncLog> {
        log.message = Some(error.to_string());
        log.transition(SyncState::Failed, self.now())?;
        warn!(account_id = %log.account_id, error = %error, "Sync pass failed");
        self.emit(SyncEvent::Failed {
            pass_id: log.id.to_string(),
            account_id: log.account_id.to_string(),
            message: error.to_string(),
        });
        self.persist(&log).await;
        Ok(log)
    }

    async fn record_last_sync(&self, account_id: &AccountId) {
        let result = async {
            if let Some(mut account) = self.ledger.find_account(account_id).await? {
                account.last_sync_at = Some(self.now());
                self.ledger.update_account(&account).await?;
            }
            Ok::<_, SyncError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(account_id = %account_id, error = %e, "Failed to record last sync time");
        }
    }

    async fn persist(&self, log: &SyncLog) {
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.insert(log).await {
            warn!(pass_id = %log.id, error = %e, "Failed to persist sync log");
            return;
        }
        if self.config.history_retention > 0 {
            let keep = u32::try_from(self.config.history_retention).unwrap_or(u32::MAX);
            if let Err(e) = history.prune(&log.account_id, keep).await {
                warn!(account_id = %log.account_id, error = %e, "Failed to prune sync history");
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}
