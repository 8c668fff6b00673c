//! Leading+trailing debounce.
//!
//! The first trigger fires immediately and opens a window. Further triggers
//! inside the window only mark a pending run; when the window closes the
//! pending run fires once. A trailing fire does not open a new window, so a
//! trigger arriving after it fires immediately again.
//!
//! The debouncer is a pure state machine over [`Instant`]s. The table driver
//! owns the timer and calls [`Debouncer::poll`] when [`Debouncer::deadline`]
//! elapses.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Run the action now.
    Fire,
    /// Coalesced into the trailing run at `until`.
    Deferred { until: Instant },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    window_end: Option<Instant>,
    pending: bool,
}

/// Zero windows are raised to this so a failing action cannot spin.
const MIN_WINDOW: Duration = Duration::from_millis(1);

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(MIN_WINDOW),
            window_end: None,
            pending: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Register a trigger at `now`.
    pub fn trigger(&mut self, now: Instant) -> DebounceDecision {
        match self.window_end {
            Some(end) if now < end => {
                self.pending = true;
                DebounceDecision::Deferred { until: end }
            }
            _ => {
                self.window_end = Some(now + self.window);
                self.pending = false;
                DebounceDecision::Fire
            }
        }
    }

    /// When the trailing run is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending {
            self.window_end
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Close the window if it has elapsed. Returns true when the trailing
    /// run should fire now.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.window_end {
            Some(end) if now >= end => {
                self.window_end = None;
                std::mem::take(&mut self.pending)
            }
            _ => false,
        }
    }

    /// Open a window at `now` with a trailing run already pending. Used when
    /// a fired action must be retried no sooner than one window later.
    pub fn rearm(&mut self, now: Instant) {
        self.window_end = Some(now + self.window);
        self.pending = true;
    }

    /// Drop any pending run and close the window.
    pub fn reset(&mut self) {
        self.window_end = None;
        self.pending = false;
    }
}
