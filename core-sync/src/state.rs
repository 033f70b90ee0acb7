//! # Sync Pass State Machine
//!
//! ```text
//! Idle ──> Listing ──> Reconciling ──> Executing ──> Done
//!  │          │             │              │
//!  │          ├──> Failed <─┘              └──> Cancelled
//!  │          └──> PendingAuth
//!  ├──> PendingAuth
//!  └──> Cancelled
//! ```
//!
//! `Done`, `Failed`, `PendingAuth` and `Cancelled` are terminal. A pass that
//! ends in `Failed` or `PendingAuth` has written nothing to the ledger.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of one sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Listing,
    Reconciling,
    Executing,
    Done,
    /// The account needs to sign in again; no network calls were made
    PendingAuth,
    /// Listing or reconciliation failed; the cursor was preserved
    Failed,
    /// Stopped between operations
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Done | SyncState::PendingAuth | SyncState::Failed | SyncState::Cancelled
        )
    }

    /// Whether a pass in this state is still running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Listing | SyncState::Reconciling | SyncState::Executing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Listing => "listing",
            SyncState::Reconciling => "reconciling",
            SyncState::Executing => "executing",
            SyncState::Done => "done",
            SyncState::PendingAuth => "pending_auth",
            SyncState::Failed => "failed",
            SyncState::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, to: SyncState) -> bool {
        use SyncState::*;

        matches!(
            (self, to),
            (Idle, Listing)
                | (Idle, PendingAuth)
                | (Idle, Cancelled)
                | (Idle, Failed)
                | (Listing, Reconciling)
                | (Listing, PendingAuth)
                | (Listing, Failed)
                | (Listing, Cancelled)
                | (Reconciling, Executing)
                | (Reconciling, Failed)
                | (Executing, Done)
                | (Executing, Cancelled)
        )
    }

    /// Validate a transition, returning the new state
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` for any edge not in the diagram above
    pub fn transition(self, to: SyncState) -> Result<SyncState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self, to),
            })
        }
    }
}

impl FromStr for SyncState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncState::Idle),
            "listing" => Ok(SyncState::Listing),
            "reconciling" => Ok(SyncState::Reconciling),
            "executing" => Ok(SyncState::Executing),
            "done" => Ok(SyncState::Done),
            "pending_auth" => Ok(SyncState::PendingAuth),
            "failed" => Ok(SyncState::Failed),
            "cancelled" => Ok(SyncState::Cancelled),
            _ => Err(SyncError::InvalidState(s.to_string())),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
