//! Bounded remote calls
//!
//! Every call into a [`RemoteStore`] goes through [`RemoteCalls`], which puts a
//! timeout on it and, for `get`/`put`/`delete`, repeats the call once when the
//! provider reports a recoverable condition. Listing is never retried within
//! a pass.

use crate::{Result, SyncError};
use bridge_traits::{RemoteEntry, RemoteListing, RemoteStore};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RemoteCalls {
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
    retry_recoverable_once: bool,
}

impl RemoteCalls {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration, retry_recoverable_once: bool) -> Self {
        Self {
            store,
            timeout,
            retry_recoverable_once,
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    async fn bounded<T, F>(&self, call: &str, fut: F) -> Result<T>
    where
        F: Future<Output = bridge_traits::error::Result<T>>,
    {
        match timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => {
                warn!(call, timeout_secs = self.timeout.as_secs(), "Remote call timed out");
                Err(SyncError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, call: &str, mut make: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::error::Result<T>>,
    {
        match self.bounded(call, make()).await {
            Err(SyncError::Bridge(e)) if self.retry_recoverable_once && e.is_recoverable() => {
                debug!(call, error = %e, "Retrying recoverable remote failure");
                self.bounded(call, make()).await
            }
            other => other,
        }
    }

    /// Whether the account holds usable credentials
    pub async fn is_authorized(&self) -> Result<bool> {
        self.bounded("is_authorized", self.store.is_authorized())
            .await
    }

    pub async fn list(&self, cursor: Option<&str>) -> Result<RemoteListing> {
        self.bounded("list", self.store.list(cursor)).await
    }

    pub async fn get_entry(&self, id: &str) -> Result<Option<RemoteEntry>> {
        self.bounded("get_entry", self.store.get_entry(id)).await
    }

    pub async fn get(&self, id: &str) -> Result<Bytes> {
        self.with_retry("get", || self.store.get(id)).await
    }

    pub async fn put(
        &self,
        id: Option<&str>,
        title: &str,
        folder_hint: &str,
        data: Bytes,
    ) -> Result<RemoteEntry> {
        self.with_retry("put", || {
            self.store.put(id, title, folder_hint, data.clone())
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.with_retry("delete", || self.store.delete(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, ProviderKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `get` with the queued errors, then succeeds
    struct FlakyStore {
        errors: std::sync::Mutex<Vec<BridgeError>>,
        gets: AtomicUsize,
        lists: AtomicUsize,
        delay: Duration,
    }

    impl FlakyStore {
        fn new(errors: Vec<BridgeError>) -> Self {
            Self {
                errors: std::sync::Mutex::new(errors),
                gets: AtomicUsize::new(0),
                lists: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn next_error(&self) -> Option<BridgeError> {
            let mut errors = self.errors.lock().unwrap();
            if errors.is_empty() {
                None
            } else {
                Some(errors.remove(0))
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        fn provider_kind(&self) -> ProviderKind {
            ProviderKind::Directory
        }

        async fn is_authorized(&self) -> bridge_traits::error::Result<bool> {
            Ok(true)
        }

        async fn list(&self, _cursor: Option<&str>) -> bridge_traits::error::Result<RemoteListing> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            match self.next_error() {
                Some(e) => Err(e),
                None => Ok(RemoteListing::default()),
            }
        }

        async fn get_entry(&self, _id: &str) -> bridge_traits::error::Result<Option<RemoteEntry>> {
            Ok(None)
        }

        async fn get(&self, _id: &str) -> bridge_traits::error::Result<Bytes> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.next_error() {
                Some(e) => Err(e),
                None => Ok(Bytes::from_static(b"vault")),
            }
        }

        async fn put(
            &self,
            _id: Option<&str>,
            title: &str,
            _folder_hint: &str,
            _data: Bytes,
        ) -> bridge_traits::error::Result<RemoteEntry> {
            Ok(RemoteEntry::file("R1", title))
        }

        async fn delete(&self, _id: &str) -> bridge_traits::error::Result<()> {
            Ok(())
        }
    }

    fn rate_limited() -> BridgeError {
        BridgeError::RateLimited {
            retry_after_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_recoverable_failure_retried_once() {
        let store = Arc::new(FlakyStore::new(vec![rate_limited()]));
        let calls = RemoteCalls::new(store.clone(), Duration::from_secs(5), true);

        let data = calls.get("R1").await.unwrap();
        assert_eq!(data.as_ref(), b"vault");
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_recoverable_failure_is_returned() {
        let store = Arc::new(FlakyStore::new(vec![rate_limited(), rate_limited()]));
        let calls = RemoteCalls::new(store.clone(), Duration::from_secs(5), true);

        let err = calls.get("R1").await.unwrap_err();
        assert!(matches!(err, SyncError::Bridge(BridgeError::RateLimited { .. })));
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        let store = Arc::new(FlakyStore::new(vec![BridgeError::Transport(
            "reset".to_string(),
        )]));
        let calls = RemoteCalls::new(store.clone(), Duration::from_secs(5), true);

        assert!(calls.get("R1").await.is_err());
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_disabled() {
        let store = Arc::new(FlakyStore::new(vec![rate_limited()]));
        let calls = RemoteCalls::new(store.clone(), Duration::from_secs(5), false);

        assert!(calls.get("R1").await.is_err());
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listing_never_retried() {
        let store = Arc::new(FlakyStore::new(vec![rate_limited()]));
        let calls = RemoteCalls::new(store.clone(), Duration::from_secs(5), true);

        assert!(calls.list(None).await.is_err());
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut store = FlakyStore::new(Vec::new());
        store.delay = Duration::from_millis(500);
        let calls = RemoteCalls::new(Arc::new(store), Duration::from_millis(20), true);

        let err = calls.get("R1").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }
}
