//! Local File Cache Abstraction
//!
//! The sync engine keeps one cached replica of every password file on the
//! device. Files are addressed by a flat filename inside a cache directory the
//! host owns:
//! - Desktop: a directory under the platform cache dir
//! - Mobile: the app-private files directory

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::error::Result;

/// Local file cache trait
///
/// Filenames are plain names without separators; implementations reject
/// anything that would escape the cache directory.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::LocalFileCache;
///
/// async fn refresh(cache: &dyn LocalFileCache, data: Bytes, mtime: i64) -> Result<()> {
///     cache.write("3f2a_1700000000000.psafe3", data).await?;
///     cache.set_modified("3f2a_1700000000000.psafe3", mtime).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LocalFileCache: Send + Sync {
    /// Directory the cache lives in
    fn cache_directory(&self) -> PathBuf;

    /// Read a cached file's contents
    async fn read(&self, name: &str) -> Result<Bytes>;

    /// Write (create or replace) a cached file
    async fn write(&self, name: &str, data: Bytes) -> Result<()>;

    /// Check whether a cached file exists
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Delete a cached file; deleting a missing file succeeds
    async fn delete(&self, name: &str) -> Result<()>;

    /// Set the file's modification time (Unix milliseconds)
    async fn set_modified(&self, name: &str, modified_at: i64) -> Result<()>;

    /// Get the file's modification time (Unix milliseconds)
    async fn modified_at(&self, name: &str) -> Result<i64>;
}

/// Reject names that are empty or would leave the cache directory.
pub fn validate_cache_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(crate::error::BridgeError::OperationFailed(format!(
            "Invalid cache file name: {:?}",
            name
        )));
    }
    Ok(())
}
