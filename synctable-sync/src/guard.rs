//! Self-refresh suppression after saves.
//!
//! A save is echoed back through the changefeed. Without a guard the echo
//! bumps the refresh counter and the UI rebuilds while the user is still
//! typing. Two strategies are offered: a time window after the latest save,
//! and exact matching on write tokens echoed by the remote.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use synctable_core::{SuppressionStrategy, SyncConfig, WriteToken};
use tokio::time::Instant;

/// Token bookkeeping is pruned after this long even if never echoed.
pub const WRITE_TOKEN_TTL: Duration = Duration::from_secs(60);

/// A changefeed event that would normally bump the refresh counter.
///
/// Initial results are never suppressed; only changes are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshTrigger {
    /// Token echoed by the remote, when the change came from a tagged save.
    pub origin: Option<WriteToken>,
}

impl RefreshTrigger {
    pub fn change(origin: Option<WriteToken>) -> Self {
        Self { origin }
    }
}

/// Decides whether a data change should bump the refresh counter.
pub trait RefreshSuppressor: Send + Sync + Debug {
    /// A save was issued at `now`, tagged with `token` when the strategy
    /// uses tokens.
    fn record_save(&mut self, token: Option<WriteToken>, now: Instant);

    /// The save tagged with `token` failed; no echo will arrive.
    fn save_failed(&mut self, _token: WriteToken) {}

    /// True if `trigger` is the echo of a recent save.
    fn should_suppress_refresh(&mut self, trigger: &RefreshTrigger, now: Instant) -> bool;
}

/// Suppress every refresh within `window` of the latest save.
#[derive(Debug, Clone)]
pub struct SaveWindowGuard {
    window: Duration,
    last_save: Option<Instant>,
}

impl SaveWindowGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_save: None,
        }
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }
}

impl RefreshSuppressor for SaveWindowGuard {
    fn record_save(&mut self, _token: Option<WriteToken>, now: Instant) {
        self.last_save = Some(now);
    }

    fn should_suppress_refresh(&mut self, _trigger: &RefreshTrigger, now: Instant) -> bool {
        match self.last_save {
            Some(at) => now.saturating_duration_since(at) < self.window,
            None => false,
        }
    }
}

/// Suppress exactly the changes that echo a pending write token.
#[derive(Debug, Clone, Default)]
pub struct WriteTokenGuard {
    pending: BTreeMap<WriteToken, Instant>,
}

impl WriteTokenGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn prune(&mut self, now: Instant) {
        self.pending
            .retain(|_, issued| now.saturating_duration_since(*issued) < WRITE_TOKEN_TTL);
    }
}

impl RefreshSuppressor for WriteTokenGuard {
    fn record_save(&mut self, token: Option<WriteToken>, now: Instant) {
        self.prune(now);
        if let Some(token) = token {
            self.pending.insert(token, now);
        }
    }

    fn save_failed(&mut self, token: WriteToken) {
        self.pending.remove(&token);
    }

    fn should_suppress_refresh(&mut self, trigger: &RefreshTrigger, now: Instant) -> bool {
        self.prune(now);
        match trigger.origin {
            Some(token) => self.pending.remove(&token).is_some(),
            None => false,
        }
    }
}

/// Build the suppressor selected by `config`.
pub fn suppressor_for(config: &SyncConfig) -> Box<dyn RefreshSuppressor> {
    match config.suppression {
        SuppressionStrategy::SaveWindow => Box::new(SaveWindowGuard::new(config.save_guard_window())),
        SuppressionStrategy::WriteToken => Box::new(WriteTokenGuard::new()),
    }
}
