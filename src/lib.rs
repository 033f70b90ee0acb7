//! Workspace placeholder crate.
//!
//! This crate exposes the shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `psync-workspace`, enable
//! `desktop-shims`, and reach the sync service façade without wiring each crate
//! individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{SyncService, SyncServiceBuilder};
