//! # Event Bus System
//!
//! Typed events broadcast over `tokio::sync::broadcast` so hosts can observe
//! sync passes and ledger changes without polling.
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐    subscribe     ┌────────────┐
//! │   Syncer    ├──────────────>│ EventBus  ├─────────────────>│ Host UI    │
//! └─────────────┘               │ (broadcast│                  └────────────┘
//! ┌─────────────┐     emit      │  channel) │    subscribe     ┌────────────┐
//! │ SyncService ├──────────────>│           ├─────────────────>│ Notifier   │
//! └─────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::PendingAuth {
//!     account_id: "acct-1".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.try_recv(), Ok(CoreEvent::Sync(SyncEvent::PendingAuth { .. }))));
//! ```
//!
//! Emitting with no subscribers returns an error that callers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Ledger(LedgerEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Ledger(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::OperationFinished { success: false, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::PendingAuth { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Ledger(LedgerEvent::AccountAdded { .. })
            | CoreEvent::Ledger(LedgerEvent::AccountRemoved { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted during a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Pass started listing the remote store.
    Started {
        pass_id: String,
        account_id: String,
        provider: String,
    },
    /// One operation finished (successfully or not).
    OperationFinished {
        pass_id: String,
        account_id: String,
        /// Human-readable operation description
        description: String,
        success: bool,
    },
    /// Pass executed its operations; some may have failed.
    Completed {
        pass_id: String,
        account_id: String,
        operations: u64,
        failures: u64,
        duration_ms: u64,
    },
    /// Listing or reconciliation failed; nothing was executed.
    Failed {
        pass_id: String,
        account_id: String,
        message: String,
    },
    /// The account needs the user to sign in again.
    PendingAuth { account_id: String },
    /// Pass was cancelled before all operations started.
    Cancelled {
        pass_id: String,
        account_id: String,
        operations_skipped: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::OperationFinished { success: true, .. } => "Sync operation succeeded",
            SyncEvent::OperationFinished { success: false, .. } => "Sync operation failed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::PendingAuth { .. } => "Account requires authorization",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

/// What happened to a file through the editing path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Saved,
    Deleted,
}

/// Events emitted by the ledger owner outside of sync passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    FileChanged {
        account_id: String,
        record_id: String,
        kind: FileChangeKind,
    },
    AccountAdded {
        account_id: String,
        provider: String,
    },
    AccountRemoved {
        account_id: String,
    },
}

impl LedgerEvent {
    fn description(&self) -> &str {
        match self {
            LedgerEvent::FileChanged { .. } => "Password file changed locally",
            LedgerEvent::AccountAdded { .. } => "Provider account added",
            LedgerEvent::AccountRemoved { .. } => "Provider account removed",
        }
    }
}

/// Central broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    ///
    /// Subscribers that fall further behind receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event, returning the number of receivers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let sync_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
