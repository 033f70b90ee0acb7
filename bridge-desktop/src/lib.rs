//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - [`TokioFileCache`] - `LocalFileCache` over `tokio::fs` in the platform cache dir
//! - [`DirectoryRemoteStore`] - `RemoteStore` over a directory tree, used for
//!   network shares and for end-to-end testing of the sync engine
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DirectoryRemoteStore, TokioFileCache};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(TokioFileCache::new());
//! let store = Arc::new(DirectoryRemoteStore::new("/mnt/share/vaults"));
//! ```

mod directory_store;
mod filesystem;

pub use directory_store::DirectoryRemoteStore;
pub use filesystem::TokioFileCache;
