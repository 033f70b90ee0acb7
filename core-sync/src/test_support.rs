//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, LocalFileCache, ProviderKind, RemoteEntry,
    RemoteListing, RemoteStore,
};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryCache {
    files: Mutex<HashMap<String, (Bytes, i64)>>,
    pub fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, data: &'static [u8], modified_at: i64) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), (Bytes::from_static(data), modified_at));
    }

    pub fn contents(&self, name: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(name).map(|(d, _)| d.clone())
    }

    pub fn mtime(&self, name: &str) -> Option<i64> {
        self.files.lock().unwrap().get(name).map(|(_, m)| *m)
    }

    pub fn names(&self) -> HashSet<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl LocalFileCache for MemoryCache {
    fn cache_directory(&self) -> PathBuf {
        PathBuf::from("/memory")
    }

    async fn read(&self, name: &str) -> BridgeResult<Bytes> {
        self.contents(name)
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    async fn write(&self, name: &str, data: Bytes) -> BridgeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), (Bytes::from_static(b"partial"), 0));
            return Err(BridgeError::OperationFailed("disk full".to_string()));
        }
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), (data, 0));
        Ok(())
    }

    async fn exists(&self, name: &str) -> BridgeResult<bool> {
        Ok(self.files.lock().unwrap().contains_key(name))
    }

    async fn delete(&self, name: &str) -> BridgeResult<()> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }

    async fn set_modified(&self, name: &str, modified_at: i64) -> BridgeResult<()> {
        match self.files.lock().unwrap().get_mut(name) {
            Some(entry) => {
                entry.1 = modified_at;
                Ok(())
            }
            None => Err(BridgeError::NotFound(name.to_string())),
        }
    }

    async fn modified_at(&self, name: &str) -> BridgeResult<i64> {
        self.mtime(name)
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }
}

/// Flat remote store; every file lives in the root folder
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (RemoteEntry, Bytes)>>,
    pub authorized: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_gets: AtomicBool,
    pub gets: AtomicUsize,
    pub deletes: AtomicUsize,
    pub puts: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.authorized.store(true, Ordering::SeqCst);
        store
    }

    pub fn add(&self, id: &str, name: &str, data: &'static [u8], modified_at: i64) {
        let entry = RemoteEntry::file(id, name)
            .with_modified_at(modified_at)
            .with_hash(format!("h-{}-{}", id, modified_at));
        self.objects
            .lock()
            .unwrap()
            .insert(id.to_string(), (entry, Bytes::from_static(data)));
    }

    pub fn remove(&self, id: &str) {
        self.objects.lock().unwrap().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(id)
    }

    pub fn data(&self, id: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(id).map(|(_, d)| d.clone())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Dropbox
    }

    async fn is_authorized(&self) -> BridgeResult<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn list(&self, _cursor: Option<&str>) -> BridgeResult<RemoteListing> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("connection reset".to_string()));
        }
        let entries = self
            .objects
            .lock()
            .unwrap()
            .values()
            .map(|(e, _)| e.clone())
            .collect();
        Ok(RemoteListing {
            entries,
            cursor: Some(format!("cursor-{}", self.next_id.load(Ordering::SeqCst))),
            is_full: true,
        })
    }

    async fn get_entry(&self, id: &str) -> BridgeResult<Option<RemoteEntry>> {
        Ok(self.objects.lock().unwrap().get(id).map(|(e, _)| e.clone()))
    }

    async fn get(&self, id: &str) -> BridgeResult<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("connection reset".to_string()));
        }
        self.data(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    async fn put(
        &self,
        id: Option<&str>,
        title: &str,
        _folder_hint: &str,
        data: Bytes,
    ) -> BridgeResult<RemoteEntry> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = id.map(str::to_string).unwrap_or_else(|| format!("N{}", n));
        let entry = RemoteEntry::file(&id, title)
            .with_modified_at(1_000 + n as i64)
            .with_hash(format!("h-{}-{}", id, n));
        self.objects
            .lock()
            .unwrap()
            .insert(id, (entry.clone(), data));
        Ok(entry)
    }

    async fn delete(&self, id: &str) -> BridgeResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(id);
        Ok(())
    }
}
