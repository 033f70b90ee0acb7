//! Core service façade.
//!
//! Wires a [`CoreConfig`](core_runtime::config::CoreConfig), the SQLite
//! ledger and the sync engine into one [`SyncService`] a host application
//! talks to. Desktop apps typically enable the `desktop-shims` feature, which
//! supplies a `TokioFileCache` by default and re-exports the directory-backed
//! remote store.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::{DirectoryRemoteStore, SyncService};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/home/ann/.local/share/psync/ledger.db")
//!     .cache_dir("/home/ann/.cache/psync")
//!     .build()?;
//! let service = SyncService::builder(config).build().await?;
//! let account = service
//!     .add_account(ProviderKind::Directory, "/mnt/share", "Share", Arc::new(DirectoryRemoteStore::new("/mnt/share")))
//!     .await?;
//! service.sync_account(account.id).await?;
//! service.start_scheduler().await?;
//! ```

pub mod error;
mod scheduler;
mod service;

pub use error::{Result, ServiceError};
pub use service::{SyncService, SyncServiceBuilder};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{DirectoryRemoteStore, TokioFileCache};
