//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the sync core:
//! - Logging and tracing setup
//! - Configuration (`CoreConfig`, `SyncSettings`, `SyncFrequency`)
//! - Event bus for sync and ledger notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
