use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] core_ledger::LedgerError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Local cache error: {0}")]
    Cache(#[from] bridge_traits::BridgeError),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("File record not found: {0}")]
    RecordNotFound(String),

    /// The host has not supplied a remote store for the account yet
    #[error("No remote store attached to account {0}")]
    StoreNotAttached(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
