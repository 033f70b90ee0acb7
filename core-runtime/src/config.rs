//! # Core Configuration Module
//!
//! Builder-based configuration for the password-file sync core.
//!
//! ## Overview
//!
//! `CoreConfig` holds the ledger location, the local file cache bridge and
//! the knobs of the sync engine. The builder fails fast when a required
//! bridge is missing and no platform default can be injected.
//!
//! ## Required Dependencies
//!
//! - `LocalFileCache` - cached password-file replicas (desktop default:
//!   `TokioFileCache` inside `cache_dir`, with the `desktop-shims` feature)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncFrequency};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/ledger.db")
//!     .cache_dir("/path/to/cache")
//!     .network_timeout(Duration::from_secs(30))
//!     .default_sync_frequency(SyncFrequency::Hourly)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, LocalFileCache, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often an account is synced by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncFrequency {
    /// Only when requested
    Manual,
    Every15Minutes,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl SyncFrequency {
    /// Scheduler period, `None` for manual accounts
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncFrequency::Manual => None,
            SyncFrequency::Every15Minutes => Some(Duration::from_secs(15 * 60)),
            SyncFrequency::Hourly => Some(Duration::from_secs(60 * 60)),
            SyncFrequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            SyncFrequency::Weekly => Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFrequency::Manual => "manual",
            SyncFrequency::Every15Minutes => "15m",
            SyncFrequency::Hourly => "1h",
            SyncFrequency::Daily => "1d",
            SyncFrequency::Weekly => "1w",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(SyncFrequency::Manual),
            "15m" => Some(SyncFrequency::Every15Minutes),
            "1h" => Some(SyncFrequency::Hourly),
            "1d" => Some(SyncFrequency::Daily),
            "1w" => Some(SyncFrequency::Weekly),
            _ => None,
        }
    }
}

impl fmt::Display for SyncFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// File extensions (without dot, case-insensitive) treated as password files
    pub file_extensions: Vec<String>,
    /// MIME types treated as password files regardless of extension
    pub mime_types: Vec<String>,
    /// Bound on every remote call
    pub network_timeout: Duration,
    /// Operations executed concurrently within one pass
    pub max_concurrent_operations: usize,
    /// Repeat a get/put/delete once when the provider reports a rate limit
    pub retry_recoverable_once: bool,
    /// Frequency assigned to newly added accounts
    pub default_frequency: SyncFrequency,
    /// Number of sync logs kept per account
    pub history_retention: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            file_extensions: vec!["psafe3".to_string()],
            mime_types: vec!["application/psafe3".to_string()],
            network_timeout: Duration::from_secs(60),
            max_concurrent_operations: 1,
            retry_recoverable_once: true,
            default_frequency: SyncFrequency::default(),
            history_retention: 50,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.file_extensions.is_empty() && self.mime_types.is_empty() {
            return Err(Error::Config(
                "At least one file extension or MIME type must be configured".to_string(),
            ));
        }

        if self
            .file_extensions
            .iter()
            .any(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(Error::Config(
                "File extensions must be non-empty and given without a leading dot".to_string(),
            ));
        }

        if self.network_timeout.is_zero() || self.network_timeout > Duration::from_secs(600) {
            return Err(Error::Config(
                "Network timeout must be between 1ms and 600s".to_string(),
            ));
        }

        if self.max_concurrent_operations == 0 || self.max_concurrent_operations > 16 {
            return Err(Error::Config(
                "Max concurrent operations must be between 1 and 16".to_string(),
            ));
        }

        if self.history_retention == 0 {
            return Err(Error::Config(
                "Sync history retention must keep at least one log".to_string(),
            ));
        }

        Ok(())
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run periodic passes per account frequency
    pub enable_scheduler: bool,
    /// Persist every pass's sync log
    pub enable_sync_history: bool,
    /// Retry uploads that failed at edit time before each scheduled pass
    pub flush_pending_before_sync: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_scheduler: true,
            enable_sync_history: true,
            flush_pending_before_sync: true,
        }
    }
}

/// Core configuration
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite ledger database
    pub database_path: PathBuf,
    /// Directory holding cached password files
    pub cache_dir: PathBuf,
    pub local_cache: Arc<dyn LocalFileCache>,
    pub clock: Arc<dyn Clock>,
    pub sync: SyncSettings,
    pub features: FeatureFlags,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("local_cache", &"LocalFileCache { ... }")
            .field("clock", &"Clock { ... }")
            .field("sync", &self.sync)
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        self.sync.validate()
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_local_cache(cache_dir: &std::path::Path) -> Result<Arc<dyn LocalFileCache>> {
    use bridge_desktop::TokioFileCache;

    let cache: Arc<dyn LocalFileCache> =
        Arc::new(TokioFileCache::with_directory(cache_dir.join("files")));
    Ok(cache)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_local_cache(_cache_dir: &std::path::Path) -> Result<Arc<dyn LocalFileCache>> {
    Err(Error::CapabilityMissing {
        capability: "LocalFileCache".to_string(),
        message: "A LocalFileCache implementation is required to hold password files. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileCache. \
                 Mobile: inject an adapter over the app-private files directory."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    local_cache: Option<Arc<dyn LocalFileCache>>,
    clock: Option<Arc<dyn Clock>>,
    sync: SyncSettings,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the local file cache implementation.
    ///
    /// If not provided, `TokioFileCache` under `cache_dir/files` is used when
    /// the `desktop-shims` feature is enabled.
    pub fn local_cache(mut self, cache: Arc<dyn LocalFileCache>) -> Self {
        self.local_cache = Some(cache);
        self
    }

    /// Sets the time source (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn file_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync.file_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync.mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }

    /// Bound on each remote call. Default: 60 seconds
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.sync.network_timeout = timeout;
        self
    }

    /// Default: 1 (sequential)
    pub fn max_concurrent_operations(mut self, max: usize) -> Self {
        self.sync.max_concurrent_operations = max;
        self
    }

    pub fn retry_recoverable_once(mut self, enabled: bool) -> Self {
        self.sync.retry_recoverable_once = enabled;
        self
    }

    pub fn default_sync_frequency(mut self, frequency: SyncFrequency) -> Self {
        self.sync.default_frequency = frequency;
        self
    }

    pub fn history_retention(mut self, logs: usize) -> Self {
        self.sync.history_retention = logs;
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = settings;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig`, injecting platform defaults for missing
    /// bridges and validating every setting.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let local_cache = match self.local_cache {
            Some(cache) => cache,
            None => provide_default_local_cache(&cache_dir)?,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            local_cache,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync,
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bytes::Bytes;

    struct NullCache;

    #[async_trait]
    impl LocalFileCache for NullCache {
        fn cache_directory(&self) -> PathBuf {
            PathBuf::from("/tmp/null")
        }

        async fn read(&self, _name: &str) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }

        async fn write(&self, _name: &str, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }

        async fn exists(&self, _name: &str) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn delete(&self, _name: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn set_modified(&self, _name: &str, _modified_at: i64) -> BridgeResult<()> {
            Ok(())
        }

        async fn modified_at(&self, _name: &str) -> BridgeResult<i64> {
            Ok(0)
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/tmp/ledger.db")
            .cache_dir("/tmp/cache")
            .local_cache(Arc::new(NullCache))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.sync.file_extensions, vec!["psafe3".to_string()]);
        assert_eq!(config.sync.network_timeout, Duration::from_secs(60));
        assert_eq!(config.sync.max_concurrent_operations, 1);
        assert!(config.sync.retry_recoverable_once);
        assert_eq!(config.sync.default_frequency, SyncFrequency::Daily);
        assert!(config.features.enable_sync_history);
    }

    #[test]
    fn test_builder_overrides() {
        let config = builder()
            .file_extensions(["psafe3", "dat"])
            .network_timeout(Duration::from_secs(5))
            .max_concurrent_operations(4)
            .retry_recoverable_once(false)
            .default_sync_frequency(SyncFrequency::Hourly)
            .build()
            .unwrap();

        assert_eq!(config.sync.file_extensions.len(), 2);
        assert_eq!(config.sync.network_timeout, Duration::from_secs(5));
        assert_eq!(config.sync.max_concurrent_operations, 4);
        assert!(!config.sync.retry_recoverable_once);
        assert_eq!(config.sync.default_frequency, SyncFrequency::Hourly);
    }

    #[test]
    fn test_missing_database_path() {
        let result = CoreConfig::builder()
            .cache_dir("/tmp/cache")
            .local_cache(Arc::new(NullCache))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_invalid_sync_settings() {
        assert!(builder().max_concurrent_operations(0).build().is_err());
        assert!(builder().network_timeout(Duration::ZERO).build().is_err());
        assert!(builder().file_extensions([".psafe3"]).build().is_err());
        assert!(builder().history_retention(0).build().is_err());
        assert!(builder()
            .file_extensions(Vec::<String>::new())
            .mime_types(Vec::<String>::new())
            .build()
            .is_err());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_local_cache_is_capability_error() {
        let result = CoreConfig::builder()
            .database_path("/tmp/ledger.db")
            .cache_dir("/tmp/cache")
            .build();
        assert!(matches!(result, Err(Error::CapabilityMissing { .. })));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_default_local_cache() {
        let config = CoreConfig::builder()
            .database_path("/tmp/ledger.db")
            .cache_dir("/tmp/cache")
            .build()
            .unwrap();
        assert_eq!(
            config.local_cache.cache_directory(),
            PathBuf::from("/tmp/cache/files")
        );
    }

    #[test]
    fn test_sync_frequency_round_trip() {
        for frequency in [
            SyncFrequency::Manual,
            SyncFrequency::Every15Minutes,
            SyncFrequency::Hourly,
            SyncFrequency::Daily,
            SyncFrequency::Weekly,
        ] {
            assert_eq!(SyncFrequency::parse(frequency.as_str()), Some(frequency));
        }
        assert_eq!(SyncFrequency::Manual.interval(), None);
        assert_eq!(
            SyncFrequency::Hourly.interval(),
            Some(Duration::from_secs(3600))
        );
    }
}
