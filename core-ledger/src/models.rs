//! Ledger domain models
//!
//! A [`FileRecord`] tracks one password file for one provider account. It has
//! two facets that are refreshed independently: the local facet (the cached
//! replica on this device) and the remote facet (the provider's copy). Each
//! facet carries a [`ChangeFlag`]; the pair of flags decides what the next
//! sync pass does with the record.

use bridge_traits::ProviderKind;
use core_runtime::config::SyncFrequency;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// Unique identifier for a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRecordId(pub Uuid);

impl FileRecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Hyphen-less form used in cache filenames
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for FileRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a provider account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pending change on one facet of a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChangeFlag {
    #[default]
    None,
    Added,
    Modified,
    Removed,
}

impl ChangeFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFlag::None => "none",
            ChangeFlag::Added => "added",
            ChangeFlag::Modified => "modified",
            ChangeFlag::Removed => "removed",
        }
    }

    /// `Added` or `Modified`
    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeFlag::Added | ChangeFlag::Modified)
    }
}

impl FromStr for ChangeFlag {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ChangeFlag::None),
            "added" => Ok(ChangeFlag::Added),
            "modified" => Ok(ChangeFlag::Modified),
            "removed" => Ok(ChangeFlag::Removed),
            _ => Err(LedgerError::invalid(
                "change_flag",
                format!("unknown change flag: {}", s),
            )),
        }
    }
}

impl fmt::Display for ChangeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync state of one password file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileRecordId,
    pub account_id: AccountId,

    /// Title shown to the user
    pub local_title: Option<String>,
    /// Cache filename; `None` until a replica exists on this device
    pub local_file: Option<String>,
    pub local_folder: Option<String>,
    /// Unix milliseconds
    pub local_modified_at: Option<i64>,
    pub local_change: ChangeFlag,

    /// Provider object id; `None` until first uploaded
    pub remote_id: Option<String>,
    pub remote_title: Option<String>,
    pub remote_folder: Option<String>,
    /// Unix milliseconds
    pub remote_modified_at: Option<i64>,
    pub remote_hash: Option<String>,
    pub remote_change: ChangeFlag,
}

impl FileRecord {
    /// A record created by a local "new file" action
    pub fn new_local(
        account_id: AccountId,
        title: impl Into<String>,
        folder: impl Into<String>,
        local_file: impl Into<String>,
        modified_at: i64,
    ) -> Self {
        Self {
            id: FileRecordId::new(),
            account_id,
            local_title: Some(title.into()),
            local_file: Some(local_file.into()),
            local_folder: Some(folder.into()),
            local_modified_at: Some(modified_at),
            local_change: ChangeFlag::Added,
            remote_id: None,
            remote_title: None,
            remote_folder: None,
            remote_modified_at: None,
            remote_hash: None,
            remote_change: ChangeFlag::None,
        }
    }

    /// A record discovered in a remote listing
    pub fn new_remote(
        account_id: AccountId,
        remote_id: impl Into<String>,
        title: impl Into<String>,
        folder: impl Into<String>,
        modified_at: Option<i64>,
        hash: Option<String>,
    ) -> Self {
        Self {
            id: FileRecordId::new(),
            account_id,
            local_title: None,
            local_file: None,
            local_folder: None,
            local_modified_at: None,
            local_change: ChangeFlag::None,
            remote_id: Some(remote_id.into()),
            remote_title: Some(title.into()),
            remote_folder: Some(folder.into()),
            remote_modified_at: modified_at,
            remote_hash: hash,
            remote_change: ChangeFlag::Added,
        }
    }

    pub fn local_deleted(&self) -> bool {
        self.local_change == ChangeFlag::Removed
    }

    pub fn remote_deleted(&self) -> bool {
        self.remote_change == ChangeFlag::Removed
    }

    /// Both facets agree and nothing is pending
    pub fn is_converged(&self) -> bool {
        self.local_change == ChangeFlag::None && self.remote_change == ChangeFlag::None
    }

    /// Title for display, preferring the local facet
    pub fn title(&self) -> &str {
        self.local_title
            .as_deref()
            .or(self.remote_title.as_deref())
            .unwrap_or("")
    }

    /// Folder for display and uploads, preferring the local facet
    pub fn folder(&self) -> &str {
        self.local_folder
            .as_deref()
            .or(self.remote_folder.as_deref())
            .unwrap_or("")
    }

    /// A record must be anchored on at least one side
    pub fn validate(&self) -> Result<(), String> {
        if self.local_file.is_none() && self.remote_id.is_none() {
            return Err(format!(
                "file record {} has neither a local file nor a remote id",
                self.id
            ));
        }
        Ok(())
    }
}

/// A linked cloud storage account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub id: AccountId,
    pub provider: ProviderKind,
    /// Provider-side user or account name
    pub identity: String,
    pub display_name: String,
    /// Opaque change-feed cursor; `None` forces a full listing
    pub sync_cursor: Option<String>,
    pub sync_frequency: SyncFrequency,
    /// Unix milliseconds of the last pass that reached `Done`
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
}

impl ProviderAccount {
    pub fn new(
        provider: ProviderKind,
        identity: impl Into<String>,
        display_name: impl Into<String>,
        sync_frequency: SyncFrequency,
        created_at: i64,
    ) -> Self {
        Self {
            id: AccountId::new(),
            provider,
            identity: identity.into(),
            display_name: display_name.into(),
            sync_cursor: None,
            sync_frequency,
            last_sync_at: None,
            created_at,
        }
    }
}
