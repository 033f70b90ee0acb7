//! Remote Storage Abstractions
//!
//! Defines the capability every storage provider plugin supplies to the sync
//! engine. Providers translate their vendor APIs into [`RemoteEntry`] values and
//! the four primitive calls of [`RemoteStore`]; everything else (filtering,
//! folder-path computation, reconciliation) is done once by the engine.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Supported storage provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Box cloud storage
    Box,
    /// Dropbox cloud storage
    Dropbox,
    /// Google Drive cloud storage
    GoogleDrive,
    /// Microsoft OneDrive cloud storage
    OneDrive,
    /// A directory tree on a mounted volume
    Directory,
}

impl ProviderKind {
    /// Get the human-readable display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Box => "Box",
            ProviderKind::Dropbox => "Dropbox",
            ProviderKind::GoogleDrive => "Google Drive",
            ProviderKind::OneDrive => "OneDrive",
            ProviderKind::Directory => "Directory",
        }
    }

    /// Get the provider identifier string used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Box => "box",
            ProviderKind::Dropbox => "dropbox",
            ProviderKind::GoogleDrive => "google_drive",
            ProviderKind::OneDrive => "onedrive",
            ProviderKind::Directory => "directory",
        }
    }

    /// Parse a provider kind from a string identifier
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "box" => Some(ProviderKind::Box),
            "dropbox" => Some(ProviderKind::Dropbox),
            "google_drive" | "googledrive" | "gdrive" => Some(ProviderKind::GoogleDrive),
            "onedrive" | "one_drive" => Some(ProviderKind::OneDrive),
            "directory" | "local" => Some(ProviderKind::Directory),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A raw entry reported by a provider
///
/// Entries carry parent references rather than paths; the sync engine walks
/// them to compute display folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Provider-specific object id
    pub id: String,
    /// Object name (empty for removed entries in change feeds)
    pub name: String,
    /// Parent folder ids, nearest first
    pub parent_ids: Vec<String>,
    /// Modification time in Unix milliseconds
    pub modified_at: Option<i64>,
    /// Provider content hash (md5, rev, etag, ...)
    pub content_hash: Option<String>,
    /// MIME type when the provider reports one
    pub mime_type: Option<String>,
    /// Whether the entry is a folder
    pub is_folder: bool,
    /// Whether a change feed reports the entry as deleted
    pub removed: bool,
}

impl RemoteEntry {
    /// Create a file entry
    pub fn file(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_ids: Vec::new(),
            modified_at: None,
            content_hash: None,
            mime_type: None,
            is_folder: false,
            removed: false,
        }
    }

    /// Create a folder entry
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_folder: true,
            ..Self::file(id, name)
        }
    }

    /// Create a deletion marker as reported by incremental change feeds
    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            removed: true,
            ..Self::file(id, String::new())
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_ids.push(parent_id.into());
        self
    }

    pub fn with_modified_at(mut self, modified_at: i64) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Result of one listing call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteListing {
    /// Files, folders, and (for change feeds) deletion markers
    pub entries: Vec<RemoteEntry>,
    /// Cursor to pass to the next incremental listing
    pub cursor: Option<String>,
    /// `true` when `entries` describes the whole remote world
    pub is_full: bool,
}

/// Remote storage capability implemented per provider
///
/// # Contract
///
/// - `list(None)` must return a full listing.
/// - `list(Some(cursor))` may return only changes since the cursor with
///   `is_full = false`; deleted objects are reported as entries with
///   `removed = true`.
/// - `delete` of an object that no longer exists must succeed.
/// - Errors are reported as [`BridgeError`](crate::error::BridgeError);
///   rate limits as `RateLimited`, missing credentials as `Unauthorized`.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::RemoteStore;
///
/// async fn count_files(store: &dyn RemoteStore) -> Result<usize> {
///     let listing = store.list(None).await?;
///     Ok(listing.entries.iter().filter(|e| !e.is_folder).count())
/// }
/// ```
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Provider this store talks to
    fn provider_kind(&self) -> ProviderKind;

    /// Whether the account currently holds usable credentials
    ///
    /// Must not perform network calls.
    async fn is_authorized(&self) -> Result<bool>;

    /// List remote entries, incrementally when a cursor is given
    async fn list(&self, cursor: Option<&str>) -> Result<RemoteListing>;

    /// Fetch a single entry (used to resolve parent folders)
    ///
    /// Returns `Ok(None)` if the entry does not exist.
    async fn get_entry(&self, id: &str) -> Result<Option<RemoteEntry>>;

    /// Download an object's contents
    async fn get(&self, id: &str) -> Result<Bytes>;

    /// Create (`id == None`) or overwrite an object
    ///
    /// `folder_hint` is the display folder path the object should live in when
    /// it is created.
    async fn put(
        &self,
        id: Option<&str>,
        title: &str,
        folder_hint: &str,
        data: Bytes,
    ) -> Result<RemoteEntry>;

    /// Delete an object; missing objects are not an error
    async fn delete(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [
            ProviderKind::Box,
            ProviderKind::Dropbox,
            ProviderKind::GoogleDrive,
            ProviderKind::OneDrive,
            ProviderKind::Directory,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("gdrive"), Some(ProviderKind::GoogleDrive));
        assert_eq!(ProviderKind::parse("ftp"), None);
    }

    #[test]
    fn test_entry_builders() {
        let entry = RemoteEntry::file("R1", "a.psafe3")
            .with_parent("F1")
            .with_modified_at(1_700_000_000_000)
            .with_hash("abc");

        assert!(!entry.is_folder);
        assert!(!entry.removed);
        assert_eq!(entry.parent_ids, vec!["F1".to_string()]);
        assert_eq!(entry.content_hash.as_deref(), Some("abc"));

        let folder = RemoteEntry::folder("F1", "Vaults");
        assert!(folder.is_folder);

        let gone = RemoteEntry::removed("R2");
        assert!(gone.removed);
        assert!(gone.name.is_empty());
    }
}
