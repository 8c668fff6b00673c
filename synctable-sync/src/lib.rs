//! synctable sync - live table synchronization over a query transport
//!
//! A [`LiveTable`] subscribes to one table through a [`QueryTransport`],
//! mirrors the initial result locally and keeps it current from the
//! changefeed. Parameter changes and disconnects are coalesced by a
//! leading+trailing debounce before resubscribing. Saves are optimistic
//! partial upserts whose echoes are kept from re-rendering the table by a
//! [`RefreshSuppressor`].

pub mod debounce;
pub mod guard;
pub mod mirror;
pub mod save;
pub mod snapshot;
pub mod subscription;
pub mod table;
pub mod transport;

pub use debounce::{DebounceDecision, Debouncer};
pub use guard::{
    suppressor_for, RefreshSuppressor, RefreshTrigger, SaveWindowGuard, WriteTokenGuard,
    WRITE_TOKEN_TTL,
};
pub use mirror::{MirrorChange, TableMirror};
pub use save::{SavePatch, SavePipeline};
pub use snapshot::{ErrorBanner, SubscriptionState, TableSnapshot};
pub use subscription::{FeedEvent, SubscriptionManager};
pub use table::{LiveTable, TableParams};
pub use transport::{MessageStream, QueryTransport, SubscribeRequest};
