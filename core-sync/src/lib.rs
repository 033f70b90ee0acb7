//! # Sync Engine
//!
//! Keeps a local cache of password files in step with a remote store.
//!
//! ## Components
//!
//! - **Listing** (`listing`): Turns a provider change feed into a filtered
//!   snapshot of password files with resolved folder paths
//! - **Reconciler** (`reconciler`): Diffs ledger records against a snapshot
//!   and plans ledger mutations plus file operations
//! - **Operations** (`operation`): Upload, Download and Remove, each split
//!   into network/cache I/O and a ledger commit
//! - **Syncer** (`syncer`): Runs one pass per account through the
//!   `state` machine and records a `sync_log`
//! - **Repository** (`repository`): Persistence for sync history

pub mod error;
pub mod listing;
pub mod operation;
pub mod reconciler;
pub mod remote_calls;
pub mod repository;
pub mod state;
pub mod sync_log;
pub mod syncer;

#[cfg(test)]
mod test_support;

pub use error::{Result, SyncError};
pub use listing::{FileFilter, FolderCache, RemoteFileDescriptor, RemoteListingAdapter, SyncRemoteFiles};
pub use operation::{
    cache_file_name, Download, OperationContext, OperationOutcome, Remove, SyncOperation, Upload,
};
pub use reconciler::{reconcile, ReconcilePlan};
pub use remote_calls::RemoteCalls;
pub use repository::{SqliteSyncLogRepository, SyncLogRepository};
pub use state::SyncState;
pub use sync_log::{SyncLog, SyncLogEntry, SyncLogId};
pub use syncer::{SyncConfig, Syncer};
