use bridge_traits::BridgeError;
use core_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Sync already in progress for account {account_id}")]
    SyncInProgress { account_id: String },

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("File record {0} not found")]
    RecordNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Local cache error: {0}")]
    LocalIo(String),

    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SyncError {
    /// The provider rejected or lacks credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Bridge(e) if e.is_unauthorized())
    }

    /// The remote object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Bridge(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
