//! Directory-backed Remote Store
//!
//! Treats a directory tree (a mounted network share, a folder synced by a
//! third-party client, a USB stick) as a remote replica. Object ids are
//! `/`-separated paths relative to the root; content hashes are SHA-256 of the
//! file contents.
//!
//! Incremental listings are supported by remembering the fingerprint of each
//! listing handed out. A cursor names one of those listings; asking for changes
//! since an unknown cursor falls back to a full listing.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    remote::{ProviderKind, RemoteEntry, RemoteListing, RemoteStore},
};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::filesystem::system_time_to_millis;

/// Number of past listings kept for incremental cursors
const MAX_REMEMBERED_LISTINGS: usize = 8;

const CURSOR_PREFIX: &str = "dir-gen-";

/// Remote store over a local directory tree
pub struct DirectoryRemoteStore {
    root: PathBuf,
    authorized: AtomicBool,
    generation: AtomicU64,
    /// generation -> (file id -> content hash)
    listings: Mutex<BTreeMap<u64, HashMap<String, String>>>,
}

impl DirectoryRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            authorized: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            listings: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Toggle authorization (a mounted share that was unmounted, revoked
    /// permissions, ...)
    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in id.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(BridgeError::OperationFailed(format!(
                    "Invalid object id: {:?}",
                    id
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn id_for(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            BridgeError::OperationFailed(format!("Path outside store root: {}", path.display()))
        })?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(segments.join("/"))
    }

    fn parent_of(id: &str) -> Option<String> {
        id.rsplit_once('/').map(|(parent, _)| parent.to_string())
    }

    fn name_of(id: &str) -> String {
        id.rsplit('/').next().unwrap_or(id).to_string()
    }

    fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    async fn entry_for(&self, path: &Path) -> Result<RemoteEntry> {
        let id = self.id_for(path)?;
        let metadata = fs::metadata(path).await?;
        let modified_at = metadata.modified().ok().map(system_time_to_millis);

        let mut entry = if metadata.is_dir() {
            RemoteEntry::folder(id.clone(), Self::name_of(&id))
        } else {
            let data = fs::read(path).await?;
            RemoteEntry::file(id.clone(), Self::name_of(&id)).with_hash(Self::hash(&data))
        };
        entry.modified_at = modified_at;
        if let Some(parent) = Self::parent_of(&id) {
            entry = entry.with_parent(parent);
        }
        Ok(entry)
    }

    async fn walk(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(child) = read_dir.next_entry().await? {
                let path = child.path();
                let file_type = child.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path.clone());
                } else if !file_type.is_file() {
                    continue;
                }
                entries.push(self.entry_for(&path).await?);
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn remember(&self, entries: &[RemoteEntry]) -> String {
        let fingerprint: HashMap<String, String> = entries
            .iter()
            .filter(|e| !e.is_folder)
            .map(|e| (e.id.clone(), e.content_hash.clone().unwrap_or_default()))
            .collect();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut listings = self.listings.lock().await;
        listings.insert(generation, fingerprint);
        while listings.len() > MAX_REMEMBERED_LISTINGS {
            if let Some(oldest) = listings.keys().next().copied() {
                listings.remove(&oldest);
            }
        }

        format!("{}{}", CURSOR_PREFIX, generation)
    }

    async fn previous_listing(&self, cursor: &str) -> Option<HashMap<String, String>> {
        let generation: u64 = cursor.strip_prefix(CURSOR_PREFIX)?.parse().ok()?;
        self.listings.lock().await.get(&generation).cloned()
    }

    async fn unique_path(&self, dir: &Path, title: &str) -> Result<PathBuf> {
        let candidate = dir.join(title);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }

        let (stem, ext) = match title.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (title.to_string(), String::new()),
        };
        let mut n = 1;
        loop {
            let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
            if !fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemoteStore {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Directory
    }

    async fn is_authorized(&self) -> Result<bool> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(fs::try_exists(&self.root).await?)
    }

    async fn list(&self, cursor: Option<&str>) -> Result<RemoteListing> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(BridgeError::Unauthorized(self.root.display().to_string()));
        }

        let entries = self.walk().await?;
        let previous = match cursor {
            Some(cursor) => self.previous_listing(cursor).await,
            None => None,
        };
        let next_cursor = self.remember(&entries).await;

        let Some(previous) = previous else {
            info!(root = %self.root.display(), count = entries.len(), "Full directory listing");
            return Ok(RemoteListing {
                entries,
                cursor: Some(next_cursor),
                is_full: true,
            });
        };

        let seen: HashSet<&str> = entries
            .iter()
            .filter(|e| !e.is_folder)
            .map(|e| e.id.as_str())
            .collect();
        let removed: Vec<RemoteEntry> = previous
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .map(|id| RemoteEntry::removed(id.clone()))
            .collect();

        let mut changes: Vec<RemoteEntry> = entries
            .into_iter()
            .filter(|e| e.is_folder || previous.get(&e.id) != e.content_hash.as_ref())
            .collect();
        changes.extend(removed);

        debug!(
            root = %self.root.display(),
            changes = changes.iter().filter(|e| !e.is_folder).count(),
            "Incremental directory listing"
        );
        Ok(RemoteListing {
            entries: changes,
            cursor: Some(next_cursor),
            is_full: false,
        })
    }

    async fn get_entry(&self, id: &str) -> Result<Option<RemoteEntry>> {
        let path = self.path_for(id)?;
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(self.entry_for(&path).await?))
    }

    async fn get(&self, id: &str) -> Result<Bytes> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BridgeError::NotFound(id.to_string()))
            }
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn put(
        &self,
        id: Option<&str>,
        title: &str,
        folder_hint: &str,
        data: Bytes,
    ) -> Result<RemoteEntry> {
        let path = match id {
            Some(id) => self.path_for(id)?,
            None => {
                let mut dir = self.root.clone();
                for segment in folder_hint.split('/').filter(|s| !s.is_empty()) {
                    if segment == "." || segment == ".." {
                        return Err(BridgeError::OperationFailed(format!(
                            "Invalid folder: {:?}",
                            folder_hint
                        )));
                    }
                    dir.push(segment);
                }
                if title.is_empty() || title.contains('/') {
                    return Err(BridgeError::OperationFailed(format!(
                        "Invalid title: {:?}",
                        title
                    )));
                }
                self.unique_path(&dir, title).await?
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data.as_ref()).await?;

        let entry = self.entry_for(&path).await?;
        debug!(id = %entry.id, size = data.len(), "Stored object");
        Ok(entry)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}
