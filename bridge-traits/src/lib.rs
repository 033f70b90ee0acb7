//! # Host Bridge Traits
//!
//! Capability traits the sync engine consumes without knowing how they are
//! implemented.
//!
//! ## Traits
//!
//! - [`RemoteStore`](remote::RemoteStore) - One cloud provider account (list, get, put, delete)
//! - [`LocalFileCache`](storage::LocalFileCache) - Cached password-file replicas on the device
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Host | Crate |
//! |------|-------|
//! | Desktop | `bridge-desktop` |
//! | Mobile | provided by the host application |
//!
//! ## Error Handling
//!
//! Every trait reports failures as [`BridgeError`](error::BridgeError).
//! Providers map their vendor errors onto it: missing objects become
//! `NotFound`, HTTP 429 becomes `RateLimited`, expired credentials become
//! `Unauthorized`. The engine uses those categories to decide between retrying,
//! treating a delete as already done, and parking the account in
//! `PendingAuth`.
//!
//! All traits require `Send + Sync`; the engine shares them across tasks
//! behind `Arc`.

pub mod error;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use remote::{ProviderKind, RemoteEntry, RemoteListing, RemoteStore};
pub use storage::LocalFileCache;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
