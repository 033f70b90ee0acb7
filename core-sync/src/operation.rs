//! # Sync Operations
//!
//! One variant per network side-effect. Each operation runs in two steps:
//!
//! 1. [`SyncOperation::execute`] performs the remote and local-cache I/O and
//!    returns an [`OperationOutcome`]. The ledger is not touched.
//! 2. [`SyncOperation::commit`] writes the outcome to the ledger. It can be
//!    repeated on its own if the ledger write fails; the network call is not
//!    repeated.

use crate::remote_calls::RemoteCalls;
use crate::{Result, SyncError};
use bridge_traits::{LocalFileCache, RemoteEntry};
use core_ledger::{ChangeFlag, FileRecord, FileRecordId, Ledger};
use std::fmt;
use tracing::{debug, warn};

const DEFAULT_EXTENSION: &str = "psafe3";

/// Cache filename for a record's replica at a given remote version
///
/// Names are derived from the record id so two records can never collide.
pub fn cache_file_name(record_id: &FileRecordId, version: i64, title: &str) -> String {
    let extension = title
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(DEFAULT_EXTENSION)
        .to_lowercase();
    format!("{}-{}.{}", record_id.simple(), version, extension)
}

/// A cache name for the next download that differs from the current replica
fn download_target(record: &FileRecord) -> String {
    let version = record.remote_modified_at.unwrap_or(0);
    let name = cache_file_name(&record.id, version, record.title());
    if record.local_file.as_deref() == Some(name.as_str()) {
        cache_file_name(&record.id, version.wrapping_add(1), record.title())
    } else {
        name
    }
}

/// Collaborators an operation executes against
pub struct OperationContext<'a> {
    pub remote: &'a RemoteCalls,
    pub cache: &'a dyn LocalFileCache,
}

/// Push a local replica to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub record_id: FileRecordId,
    pub title: String,
    pub folder: String,
    pub local_file: String,
    /// `None` creates a new remote object
    pub remote_id: Option<String>,
}

/// Pull the remote object into a fresh cache file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub record_id: FileRecordId,
    pub title: String,
    pub remote_id: String,
    pub remote_modified_at: Option<i64>,
    pub target_file: String,
    /// Replica being replaced, deleted once the new one is written
    pub previous_file: Option<String>,
}

/// Delete a file on whichever sides still hold it, then forget the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remove {
    pub record_id: FileRecordId,
    pub title: String,
    pub local_file: Option<String>,
    /// Set only when the remote copy is not already known to be gone
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    Upload(Upload),
    Download(Download),
    Remove(Remove),
}

/// Result of [`SyncOperation::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Uploaded(RemoteEntry),
    /// A failed download is an outcome, not an error, so the batch continues
    Downloaded {
        downloaded: bool,
        error: Option<String>,
    },
    Removed,
}

impl OperationOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(
            self,
            OperationOutcome::Downloaded {
                downloaded: false,
                ..
            }
        )
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OperationOutcome::Downloaded { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}

impl Upload {
    pub fn for_record(record: &FileRecord) -> Option<Self> {
        Some(Self {
            record_id: record.id,
            title: record.title().to_string(),
            folder: record.folder().to_string(),
            local_file: record.local_file.clone()?,
            remote_id: record.remote_id.clone(),
        })
    }
}

impl Download {
    pub fn for_record(record: &FileRecord) -> Option<Self> {
        Some(Self {
            record_id: record.id,
            title: record
                .remote_title
                .clone()
                .unwrap_or_else(|| record.title().to_string()),
            remote_id: record.remote_id.clone()?,
            remote_modified_at: record.remote_modified_at,
            target_file: download_target(record),
            previous_file: record.local_file.clone(),
        })
    }
}

impl Remove {
    pub fn for_record(record: &FileRecord) -> Self {
        Self {
            record_id: record.id,
            title: record.title().to_string(),
            local_file: record.local_file.clone(),
            remote_id: if record.remote_deleted() {
                None
            } else {
                record.remote_id.clone()
            },
        }
    }
}

impl SyncOperation {
    pub fn record_id(&self) -> FileRecordId {
        match self {
            SyncOperation::Upload(op) => op.record_id,
            SyncOperation::Download(op) => op.record_id,
            SyncOperation::Remove(op) => op.record_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncOperation::Upload(_) => "upload",
            SyncOperation::Download(_) => "download",
            SyncOperation::Remove(_) => "remove",
        }
    }

    /// Human-readable line for the sync log
    pub fn description(&self) -> String {
        match self {
            SyncOperation::Upload(op) => {
                let qualifier = if op.remote_id.is_some() {
                    "local to remote"
                } else {
                    "local to remote, new file"
                };
                format!("Upload {} ({})", op.title, qualifier)
            }
            SyncOperation::Download(op) => format!("Download {} (remote to local)", op.title),
            SyncOperation::Remove(op) => {
                let qualifier = match (op.local_file.is_some(), op.remote_id.is_some()) {
                    (true, true) => "local and remote",
                    (true, false) => "local only",
                    (false, true) => "remote only",
                    (false, false) => "record only",
                };
                format!("Remove {} ({})", op.title, qualifier)
            }
        }
    }

    /// Perform the I/O for this operation
    ///
    /// # Errors
    ///
    /// Upload and Remove propagate transport and cache failures. Download
    /// never fails; see [`OperationOutcome::Downloaded`].
    pub async fn execute(&self, ctx: &OperationContext<'_>) -> Result<OperationOutcome> {
        match self {
            SyncOperation::Upload(op) => {
                let data = ctx
                    .cache
                    .read(&op.local_file)
                    .await
                    .map_err(|e| SyncError::LocalIo(e.to_string()))?;
                let entry = ctx
                    .remote
                    .put(op.remote_id.as_deref(), &op.title, &op.folder, data)
                    .await?;
                debug!(record_id = %op.record_id, remote_id = %entry.id, "Uploaded");
                Ok(OperationOutcome::Uploaded(entry))
            }
            SyncOperation::Download(op) => Ok(op.execute(ctx).await),
            SyncOperation::Remove(op) => {
                if let Some(remote_id) = &op.remote_id {
                    match ctx.remote.delete(remote_id).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(remote_id = %remote_id, "Remote object already gone");
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(local_file) = &op.local_file {
                    ctx.cache
                        .delete(local_file)
                        .await
                        .map_err(|e| SyncError::LocalIo(e.to_string()))?;
                }
                Ok(OperationOutcome::Removed)
            }
        }
    }

    /// Write an outcome of [`execute`](Self::execute) to the ledger
    ///
    /// A download's superseded replica is deleted only once the ledger points
    /// at the new one.
    ///
    /// # Errors
    ///
    /// `RecordNotFound` if an upload or download target vanished, or a
    /// ledger failure. A failed commit may be retried with the same outcome.
    pub async fn commit(
        &self,
        ledger: &dyn Ledger,
        cache: &dyn LocalFileCache,
        outcome: &OperationOutcome,
    ) -> Result<()> {
        match (self, outcome) {
            (SyncOperation::Upload(op), OperationOutcome::Uploaded(entry)) => {
                let mut record = load(ledger, &op.record_id).await?;
                record.remote_id = Some(entry.id.clone());
                record.remote_title = Some(entry.name.clone());
                record.remote_folder = Some(op.folder.clone());
                record.remote_modified_at = entry.modified_at;
                record.remote_hash = entry.content_hash.clone();
                record.remote_change = ChangeFlag::None;
                record.local_change = ChangeFlag::None;
                ledger.update_file(&record).await?;
                Ok(())
            }
            (SyncOperation::Download(_), OperationOutcome::Downloaded { downloaded: false, .. }) => {
                Ok(())
            }
            (SyncOperation::Download(op), OperationOutcome::Downloaded { downloaded: true, .. }) => {
                let mut record = load(ledger, &op.record_id).await?;
                record.local_file = Some(op.target_file.clone());
                record.local_title = record
                    .remote_title
                    .clone()
                    .or_else(|| Some(op.title.clone()));
                record.local_folder = record.remote_folder.clone();
                record.local_modified_at = op.remote_modified_at;
                record.local_change = ChangeFlag::None;
                record.remote_change = ChangeFlag::None;
                ledger.update_file(&record).await?;

                if let Some(previous) = op.previous_file.as_deref().filter(|p| *p != op.target_file) {
                    if let Err(e) = cache.delete(previous).await {
                        warn!(file = previous, error = %e, "Failed to delete replaced replica");
                    }
                }
                Ok(())
            }
            (SyncOperation::Remove(op), OperationOutcome::Removed) => {
                if !ledger.delete_file(&op.record_id).await? {
                    debug!(record_id = %op.record_id, "Record already gone");
                }
                Ok(())
            }
            (op, outcome) => Err(SyncError::InvalidState(format!(
                "{} cannot commit outcome {:?}",
                op.kind(),
                outcome
            ))),
        }
    }

    /// Undo the local-cache effect of an outcome that could not be committed
    ///
    /// The ledger still names the previous replica, so a fetched download
    /// target is dropped and the record is picked up again by the next pass.
    pub async fn discard(&self, cache: &dyn LocalFileCache, outcome: &OperationOutcome) {
        if let (SyncOperation::Download(op), OperationOutcome::Downloaded { downloaded: true, .. }) =
            (self, outcome)
        {
            if let Err(e) = cache.delete(&op.target_file).await {
                warn!(file = %op.target_file, error = %e, "Failed to delete uncommitted download");
            }
        }
    }
}

impl Download {
    async fn execute(&self, ctx: &OperationContext<'_>) -> OperationOutcome {
        match self.fetch(ctx).await {
            Ok(()) => OperationOutcome::Downloaded {
                downloaded: true,
                error: None,
            },
            Err(e) => {
                warn!(record_id = %self.record_id, error = %e, "Download failed");
                if let Err(cleanup) = ctx.cache.delete(&self.target_file).await {
                    warn!(file = %self.target_file, error = %cleanup, "Failed to delete partial download");
                }
                OperationOutcome::Downloaded {
                    downloaded: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn fetch(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let data = ctx.remote.get(&self.remote_id).await?;
        ctx.cache
            .write(&self.target_file, data)
            .await
            .map_err(|e| SyncError::LocalIo(e.to_string()))?;
        if let Some(modified_at) = self.remote_modified_at {
            ctx.cache
                .set_modified(&self.target_file, modified_at)
                .await
                .map_err(|e| SyncError::LocalIo(e.to_string()))?;
        }
        Ok(())
    }
}

async fn load(ledger: &dyn Ledger, id: &FileRecordId) -> Result<FileRecord> {
    ledger
        .find_file(id)
        .await?
        .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryCache, MemoryStore};
    use bridge_traits::ProviderKind;
    use core_ledger::{create_test_pool, ProviderAccount, SqliteLedger};
    use core_runtime::config::SyncFrequency;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        ledger: SqliteLedger,
        account: ProviderAccount,
        store: Arc<MemoryStore>,
        cache: MemoryCache,
        remote: RemoteCalls,
    }

    async fn fixture() -> Fixture {
        let ledger = SqliteLedger::new(create_test_pool().await.unwrap());
        let account = ProviderAccount::new(
            ProviderKind::Dropbox,
            "ann",
            "Ann",
            SyncFrequency::Daily,
            0,
        );
        ledger.insert_account(&account).await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let remote = RemoteCalls::new(store.clone(), Duration::from_secs(5), true);
        Fixture {
            ledger,
            account,
            store,
            cache: MemoryCache::new(),
            remote,
        }
    }

    async fn run(fx: &Fixture, op: &SyncOperation) -> Result<OperationOutcome> {
        let ctx = OperationContext {
            remote: &fx.remote,
            cache: &fx.cache,
        };
        let outcome = op.execute(&ctx).await?;
        op.commit(&fx.ledger, &fx.cache, &outcome).await?;
        Ok(outcome)
    }

    #[test]
    fn test_cache_file_name() {
        let id = FileRecordId::new();
        let name = cache_file_name(&id, 42, "Vault.PSAFE3");
        assert_eq!(name, format!("{}-42.psafe3", id.simple()));
        assert!(cache_file_name(&id, 0, "no extension").ends_with(".psafe3"));
        assert!(cache_file_name(&id, 0, "odd.ext/../x").ends_with(".psafe3"));
    }

    #[test]
    fn test_download_target_differs_from_current_replica() {
        let mut record =
            FileRecord::new_remote(core_ledger::AccountId::new(), "R1", "a.psafe3", "/", Some(7), None);
        let first = download_target(&record);
        record.local_file = Some(first.clone());
        assert_ne!(download_target(&record), first);
    }

    #[test]
    fn test_descriptions() {
        let record = FileRecord::new_local(core_ledger::AccountId::new(), "a.psafe3", "/", "f", 1);
        let upload = SyncOperation::Upload(Upload::for_record(&record).unwrap());
        assert_eq!(upload.description(), "Upload a.psafe3 (local to remote, new file)");

        let mut remove = Remove::for_record(&record);
        assert_eq!(
            SyncOperation::Remove(remove.clone()).description(),
            "Remove a.psafe3 (local only)"
        );
        remove.remote_id = Some("R1".to_string());
        assert_eq!(
            SyncOperation::Remove(remove).description(),
            "Remove a.psafe3 (local and remote)"
        );
    }

    #[tokio::test]
    async fn test_download_writes_replica_and_commits() {
        let fx = fixture().await;
        fx.store.add("R1", "a.psafe3", b"remote-bytes", 500);
        let record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", Some(500), None);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Download(Download::for_record(&record).unwrap());
        let outcome = run(&fx, &op).await.unwrap();
        assert!(outcome.succeeded());

        let stored = fx.ledger.find_file(&record.id).await.unwrap().unwrap();
        let local_file = stored.local_file.clone().unwrap();
        assert_eq!(fx.cache.contents(&local_file).unwrap().as_ref(), b"remote-bytes");
        assert_eq!(fx.cache.mtime(&local_file), Some(500));
        assert_eq!(stored.local_change, ChangeFlag::None);
        assert_eq!(stored.remote_change, ChangeFlag::None);
        assert_eq!(stored.local_title.as_deref(), Some("a.psafe3"));
    }

    #[tokio::test]
    async fn test_download_replaces_previous_replica() {
        let fx = fixture().await;
        fx.store.add("R1", "a.psafe3", b"v2", 900);
        let mut record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", Some(900), None);
        record.local_file = Some("old.psafe3".to_string());
        fx.cache.insert("old.psafe3", b"v1", 100);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Download(Download::for_record(&record).unwrap());
        run(&fx, &op).await.unwrap();

        assert!(fx.cache.contents("old.psafe3").is_none());
        let stored = fx.ledger.find_file(&record.id).await.unwrap().unwrap();
        assert_eq!(
            fx.cache.contents(stored.local_file.as_deref().unwrap()).unwrap().as_ref(),
            b"v2"
        );
    }

    #[tokio::test]
    async fn test_download_keeps_previous_replica_until_commit() {
        let fx = fixture().await;
        fx.store.add("R1", "a.psafe3", b"v2", 900);
        let mut record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", Some(900), None);
        record.local_file = Some("old.psafe3".to_string());
        fx.cache.insert("old.psafe3", b"v1", 100);
        fx.ledger.insert_file(&record).await.unwrap();

        let download = Download::for_record(&record).unwrap();
        let target = download.target_file.clone();
        let op = SyncOperation::Download(download);
        let ctx = OperationContext {
            remote: &fx.remote,
            cache: &fx.cache,
        };
        let outcome = op.execute(&ctx).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(fx.cache.contents("old.psafe3").unwrap().as_ref(), b"v1");

        // Commit never lands: the ledger still names the old replica.
        op.discard(&fx.cache, &outcome).await;
        assert_eq!(fx.cache.contents("old.psafe3").unwrap().as_ref(), b"v1");
        assert!(fx.cache.contents(&target).is_none());
        let stored = fx.ledger.find_file(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.local_file.as_deref(), Some("old.psafe3"));
    }

    #[tokio::test]
    async fn test_failed_download_cleans_up_and_leaves_record() {
        let fx = fixture().await;
        fx.store.add("R1", "a.psafe3", b"remote-bytes", 500);
        fx.cache.fail_writes.store(true, Ordering::SeqCst);
        let record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", Some(500), None);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Download(Download::for_record(&record).unwrap());
        let outcome = run(&fx, &op).await.unwrap();

        assert!(!outcome.succeeded());
        assert!(outcome.error().unwrap().contains("disk full"));
        assert!(fx.cache.names().is_empty());
        let stored = fx.ledger.find_file(&record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_upload_commits_remote_facet() {
        let fx = fixture().await;
        fx.cache.insert("f.psafe3", b"local-bytes", 10);
        let record = FileRecord::new_local(fx.account.id, "new.psafe3", "/Vaults", "f.psafe3", 10);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Upload(Upload::for_record(&record).unwrap());
        run(&fx, &op).await.unwrap();

        let stored = fx.ledger.find_file(&record.id).await.unwrap().unwrap();
        let remote_id = stored.remote_id.clone().unwrap();
        assert_eq!(fx.store.data(&remote_id).unwrap().as_ref(), b"local-bytes");
        assert_eq!(stored.remote_folder.as_deref(), Some("/Vaults"));
        assert_eq!(stored.local_change, ChangeFlag::None);
        assert_eq!(stored.remote_change, ChangeFlag::None);
    }

    #[tokio::test]
    async fn test_upload_without_local_replica_fails_before_network() {
        let fx = fixture().await;
        let record = FileRecord::new_local(fx.account.id, "new.psafe3", "/", "missing.psafe3", 10);

        let op = SyncOperation::Upload(Upload::for_record(&record).unwrap());
        let ctx = OperationContext {
            remote: &fx.remote,
            cache: &fx.cache,
        };
        let err = op.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalIo(_)));
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_of_missing_remote_succeeds() {
        let fx = fixture().await;
        let mut record = FileRecord::new_remote(fx.account.id, "GONE", "a.psafe3", "/", None, None);
        record.local_file = Some("a.psafe3".to_string());
        record.local_change = ChangeFlag::Removed;
        record.remote_change = ChangeFlag::None;
        fx.cache.insert("a.psafe3", b"x", 1);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Remove(Remove::for_record(&record));
        run(&fx, &op).await.unwrap();

        assert_eq!(fx.store.deletes.load(Ordering::SeqCst), 1);
        assert!(fx.cache.contents("a.psafe3").is_none());
        assert!(fx.ledger.find_file(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_skips_remote_already_deleted() {
        let fx = fixture().await;
        let mut record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", None, None);
        record.remote_change = ChangeFlag::Removed;

        let op = SyncOperation::Remove(Remove::for_record(&record));
        assert_eq!(op.description(), "Remove a.psafe3 (record only)");
        run(&fx, &op).await.unwrap();
        assert_eq!(fx.store.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_commit_can_be_repeated() {
        let fx = fixture().await;
        let record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", None, None);
        fx.ledger.insert_file(&record).await.unwrap();

        let op = SyncOperation::Remove(Remove::for_record(&record));
        op.commit(&fx.ledger, &fx.cache, &OperationOutcome::Removed).await.unwrap();
        op.commit(&fx.ledger, &fx.cache, &OperationOutcome::Removed).await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_outcome_is_rejected() {
        let fx = fixture().await;
        let record = FileRecord::new_remote(fx.account.id, "R1", "a.psafe3", "/", None, None);
        let op = SyncOperation::Remove(Remove::for_record(&record));
        let outcome = OperationOutcome::Downloaded {
            downloaded: true,
            error: None,
        };
        assert!(op.commit(&fx.ledger, &fx.cache, &outcome).await.is_err());
    }
}
