//! Local File Cache Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{validate_cache_name, LocalFileCache},
};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

/// Tokio-based local file cache
///
/// All cached password files live flat in one directory, created lazily on the
/// first write.
pub struct TokioFileCache {
    cache_dir: PathBuf,
}

impl TokioFileCache {
    /// Create a cache in the platform cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("psync")
            .join("files");

        Self { cache_dir }
    }

    /// Create a cache rooted at a custom directory
    pub fn with_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_cache_name(name)?;
        Ok(self.cache_dir.join(name))
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileCache {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn system_time_to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn millis_to_system_time(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

#[async_trait]
impl LocalFileCache for TokioFileCache {
    fn cache_directory(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.path_for(name)?;
        let data = fs::read(&path).await.map_err(Self::map_io_error)?;
        debug!(file = name, size = data.len(), "Read cached file");
        Ok(Bytes::from(data))
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(name)?;
        if !fs::try_exists(&self.cache_dir)
            .await
            .map_err(Self::map_io_error)?
        {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }

        fs::write(&path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(file = name, size = data.len(), "Wrote cached file");
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        fs::try_exists(&path).await.map_err(Self::map_io_error)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = name, "Deleted cached file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn set_modified(&self, name: &str, modified_at: i64) -> Result<()> {
        let path = self.path_for(name)?;
        let time = millis_to_system_time(modified_at);

        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(time)
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("set_modified task failed: {}", e)))?
        .map_err(Self::map_io_error)
    }

    async fn modified_at(&self, name: &str) -> Result<i64> {
        let path = self.path_for(name)?;
        let metadata = fs::metadata(&path).await.map_err(Self::map_io_error)?;
        let modified = metadata.modified().map_err(Self::map_io_error)?;
        Ok(system_time_to_millis(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, TokioFileCache) {
        let dir = TempDir::new().unwrap();
        let cache = TokioFileCache::with_directory(dir.path().join("files"));
        (dir, cache)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_dir, cache) = cache();

        let data = Bytes::from_static(b"PWS3 payload");
        cache.write("a.psafe3", data.clone()).await.unwrap();

        assert!(cache.exists("a.psafe3").await.unwrap());
        assert_eq!(cache.read("a.psafe3").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, cache) = cache();

        cache
            .write("a.psafe3", Bytes::from_static(b"x"))
            .await
            .unwrap();
        cache.delete("a.psafe3").await.unwrap();
        cache.delete("a.psafe3").await.unwrap();

        assert!(!cache.exists("a.psafe3").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_modified_round_trip() {
        let (_dir, cache) = cache();

        cache
            .write("a.psafe3", Bytes::from_static(b"x"))
            .await
            .unwrap();
        cache.set_modified("a.psafe3", 1_600_000_000_000).await.unwrap();

        assert_eq!(cache.modified_at("a.psafe3").await.unwrap(), 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let (_dir, cache) = cache();

        let result = cache.write("../outside", Bytes::from_static(b"x")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, cache) = cache();

        let err = cache.read("missing.psafe3").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
