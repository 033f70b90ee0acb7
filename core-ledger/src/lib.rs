//! # Core Ledger
//!
//! Durable sync state for password files: one [`models::FileRecord`] per
//! tracked file and one [`models::ProviderAccount`] per linked cloud account,
//! stored in SQLite.
//!
//! ```rust,ignore
//! use core_ledger::{create_pool, DatabaseConfig, Ledger, SqliteLedger};
//!
//! let pool = create_pool(DatabaseConfig::new("ledger.db")).await?;
//! let ledger = SqliteLedger::new(pool);
//! let accounts = ledger.list_accounts().await?;
//! ```

pub mod db;
pub mod error;
pub mod ledger;
pub mod models;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LedgerError, Result};
pub use ledger::{CursorUpdate, Ledger, LedgerBatch, SqliteLedger};
pub use models::{AccountId, ChangeFlag, FileRecord, FileRecordId, ProviderAccount};
