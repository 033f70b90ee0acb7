//! # Sync Log
//!
//! Append-only record of one pass: its state, whether the listing was full,
//! and one entry per attempted operation. The log is the only channel through
//! which per-file failures reach the user.

use crate::state::SyncState;
use crate::Result;
use core_ledger::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a sync pass and its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncLogId(Uuid);

impl SyncLogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SyncLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one attempted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub description: String,
    pub success: bool,
    /// Failure cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncLogEntry {
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(description: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: SyncLogId,
    pub account_id: AccountId,
    pub state: SyncState,
    pub full_listing: bool,
    pub entries: Vec<SyncLogEntry>,
    /// Pass-level message (listing error, cancellation note)
    pub message: Option<String>,
    /// Unix milliseconds
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl SyncLog {
    pub fn new(account_id: AccountId, started_at: i64) -> Self {
        Self {
            id: SyncLogId::new(),
            account_id,
            state: SyncState::Idle,
            full_listing: false,
            entries: Vec::new(),
            message: None,
            started_at,
            finished_at: None,
        }
    }

    /// Move to `to`, stamping `finished_at` when it is terminal
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` if the state machine forbids the edge
    pub fn transition(&mut self, to: SyncState, at: i64) -> Result<()> {
        self.state = self.state.transition(to)?;
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    pub fn push(&mut self, entry: SyncLogEntry) {
        self.entries.push(entry);
    }

    pub fn operations(&self) -> usize {
        self.entries.len()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.success).count()
    }

    pub fn duration_millis(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
