//! # Remote Listing Adapter
//!
//! Turns a provider's raw [`RemoteListing`] into a [`SyncRemoteFiles`]
//! snapshot: only password files, keyed by remote id, each with a display
//! folder path computed by walking parent references.
//!
//! Folder lookups are memoized in a [`FolderCache`] owned by one adapter, and
//! an adapter lives for exactly one sync pass. Nothing is shared across
//! accounts or passes.

use crate::remote_calls::RemoteCalls;
use crate::Result;
use bridge_traits::RemoteEntry;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument, warn};

/// Longest parent chain followed before giving up on a folder path
const MAX_FOLDER_DEPTH: usize = 64;

/// Provider-neutral description of one remote password file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileDescriptor {
    pub remote_id: String,
    pub title: String,
    /// `/`-separated display path, `/` for the root
    pub folder: String,
    /// Unix milliseconds
    pub modified_at: Option<i64>,
    pub hash: Option<String>,
    pub is_folder: bool,
    /// Reported deleted by an incremental listing
    pub removed: bool,
}

impl RemoteFileDescriptor {
    pub fn file(
        remote_id: impl Into<String>,
        title: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            title: title.into(),
            folder: folder.into(),
            modified_at: None,
            hash: None,
            is_folder: false,
            removed: false,
        }
    }

    pub fn removed(remote_id: impl Into<String>) -> Self {
        Self {
            removed: true,
            ..Self::file(remote_id, "", "")
        }
    }

    pub fn with_modified_at(mut self, modified_at: i64) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// Snapshot of the remote side for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRemoteFiles {
    files: BTreeMap<String, RemoteFileDescriptor>,
    pub cursor: Option<String>,
    /// `false` for change feeds; records absent from a partial snapshot must
    /// be left alone
    pub is_full: bool,
}

impl SyncRemoteFiles {
    pub fn new(cursor: Option<String>, is_full: bool) -> Self {
        Self {
            files: BTreeMap::new(),
            cursor,
            is_full,
        }
    }

    pub fn insert(&mut self, file: RemoteFileDescriptor) {
        self.files.insert(file.remote_id.clone(), file);
    }

    pub fn with_file(mut self, file: RemoteFileDescriptor) -> Self {
        self.insert(file);
        self
    }

    pub fn get(&self, remote_id: &str) -> Option<&RemoteFileDescriptor> {
        self.files.get(remote_id)
    }

    /// Entries in remote id order
    pub fn iter(&self) -> impl Iterator<Item = &RemoteFileDescriptor> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Which remote files belong to this application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    extensions: Vec<String>,
    mime_types: Vec<String>,
}

impl FileFilter {
    pub fn new(extensions: &[String], mime_types: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            mime_types: mime_types.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, entry: &RemoteEntry) -> bool {
        if entry.is_folder {
            return false;
        }

        if let Some(mime) = &entry.mime_type {
            if self.mime_types.iter().any(|m| m.eq_ignore_ascii_case(mime)) {
                return true;
            }
        }

        match entry.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

/// Folder entries seen during one pass, keyed by id
#[derive(Debug, Default)]
pub struct FolderCache {
    folders: HashMap<String, Option<RemoteEntry>>,
    fetches: usize,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, entry: RemoteEntry) {
        self.folders.insert(entry.id.clone(), Some(entry));
    }

    /// Number of `get_entry` calls made to fill the cache
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    async fn lookup(&mut self, remote: &RemoteCalls, id: &str) -> Result<Option<RemoteEntry>> {
        if let Some(known) = self.folders.get(id) {
            return Ok(known.clone());
        }

        self.fetches += 1;
        let fetched = remote.get_entry(id).await?.filter(|e| e.is_folder);
        self.folders.insert(id.to_string(), fetched.clone());
        Ok(fetched)
    }

    /// Display path of the folder with id `parent_id`
    ///
    /// Unknown parents end the walk; they are treated as the root.
    pub async fn path_of(&mut self, remote: &RemoteCalls, parent_id: Option<&str>) -> Result<String> {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut next = parent_id.map(str::to_string);

        while let Some(id) = next.take() {
            if !visited.insert(id.clone()) || visited.len() > MAX_FOLDER_DEPTH {
                warn!(folder_id = %id, "Folder parent chain loops or is too deep");
                break;
            }

            match self.lookup(remote, &id).await? {
                Some(folder) => {
                    if !folder.name.is_empty() {
                        segments.push(folder.name.clone());
                    }
                    next = folder.parent_ids.first().cloned();
                }
                None => break,
            }
        }

        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Builds provider-neutral snapshots for one pass
pub struct RemoteListingAdapter {
    remote: RemoteCalls,
    filter: FileFilter,
    folders: FolderCache,
}

impl RemoteListingAdapter {
    pub fn new(remote: RemoteCalls, filter: FileFilter) -> Self {
        Self {
            remote,
            filter,
            folders: FolderCache::new(),
        }
    }

    pub fn folder_cache(&self) -> &FolderCache {
        &self.folders
    }

    /// List remote password files, incrementally when `cursor` is set
    ///
    /// Read-only: nothing is written anywhere before this returns.
    ///
    /// # Errors
    ///
    /// Transport and authorization failures from the store, unmodified
    #[instrument(skip(self), fields(provider = %self.remote.store().provider_kind()))]
    pub async fn list_remote_files(&mut self, cursor: Option<&str>) -> Result<SyncRemoteFiles> {
        let listing = self.remote.list(cursor).await?;
        let mut snapshot = SyncRemoteFiles::new(listing.cursor, listing.is_full);

        let (folders, files): (Vec<_>, Vec<_>) =
            listing.entries.into_iter().partition(|e| e.is_folder);
        for folder in folders {
            if !folder.removed {
                self.folders.remember(folder);
            }
        }

        let mut skipped = 0usize;
        for entry in files {
            if entry.removed {
                snapshot.insert(RemoteFileDescriptor::removed(entry.id));
                continue;
            }
            if !self.filter.matches(&entry) {
                // A change may have moved a tracked file out of the filter.
                // A full listing drops it by absence; a partial one must say so.
                if !snapshot.is_full {
                    snapshot.insert(RemoteFileDescriptor::removed(entry.id));
                }
                skipped += 1;
                continue;
            }

            let folder = self
                .folders
                .path_of(&self.remote, entry.parent_ids.first().map(String::as_str))
                .await?;
            snapshot.insert(RemoteFileDescriptor {
                remote_id: entry.id,
                title: entry.name,
                folder,
                modified_at: entry.modified_at,
                hash: entry.content_hash,
                is_folder: false,
                removed: false,
            });
        }

        debug!(
            files = snapshot.len(),
            skipped,
            is_full = snapshot.is_full,
            folder_fetches = self.folders.fetches(),
            "Built remote snapshot"
        );
        Ok(snapshot)
    }
}
