//! Observable table state.
//!
//! The driver publishes a fresh [`TableSnapshot`] through a `watch` channel
//! whenever anything a consumer can see changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use synctable_core::Record;

/// Lifecycle of the subscription behind a live table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// No subscription; either never opened or the feed ended without
    /// changefeed semantics.
    #[default]
    Idle,
    /// Request sent, initial result not yet received.
    Subscribing,
    /// Initial result received.
    Live,
    /// The connection dropped; a resubscription is scheduled.
    Disconnected,
    /// The table was closed. Terminal.
    Cancelled,
}

/// The single user-visible error string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub table: String,
    pub records: Arc<Vec<Record>>,
    /// Mirror version; moves on every data mutation.
    pub version: u64,
    /// Moves when consumers should rebuild; held still for self-echoes.
    pub refresh_counter: u64,
    /// True until the first initial result arrives, and again while a
    /// resubscription is outstanding.
    pub loading: bool,
    pub saves_in_flight: usize,
    pub error: Option<ErrorBanner>,
    pub subscription: SubscriptionState,
    /// Disconnects observed over the table's lifetime.
    pub disconnects: u64,
    /// Subscriptions opened over the table's lifetime.
    pub subscriptions_opened: u64,
}

impl TableSnapshot {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            records: Arc::new(Vec::new()),
            version: 0,
            refresh_counter: 0,
            loading: true,
            saves_in_flight: 0,
            error: None,
            subscription: SubscriptionState::Idle,
            disconnects: 0,
            subscriptions_opened: 0,
        }
    }

    /// True while any save is outstanding.
    pub fn is_saving(&self) -> bool {
        self.saves_in_flight > 0
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}
