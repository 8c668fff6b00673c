//! The query transport seam.
//!
//! The transport is an external collaborator: it turns subscribe requests
//! into a stream of [`QueryMessage`]s, persists save patches and releases
//! changefeeds. Everything above it is transport-agnostic.

use async_trait::async_trait;
use serde_json::{json, Value};
use synctable_core::{
    QueryDescriptor, QueryMessage, QueryOptions, SubscriptionId, TransportError,
};
use tokio::sync::mpsc;

use crate::save::SavePatch;

/// Messages of one subscription, initial result first.
///
/// A `TransportError::Disconnected` item, or the stream closing while a
/// changefeed was requested, means the subscription is gone.
pub type MessageStream = mpsc::Receiver<Result<QueryMessage, TransportError>>;

/// A changefeed request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub query: QueryDescriptor,
    pub options: QueryOptions,
    /// Keep the feed open for changes after the initial result.
    pub changes: bool,
}

impl SubscribeRequest {
    pub fn table(&self) -> &str {
        self.query.table()
    }

    /// Wire form: `{ query, options, changes }`.
    pub fn to_json(&self) -> Value {
        json!({
            "query": self.query.to_json(),
            "options": self.options,
            "changes": self.changes,
        })
    }
}

/// Query/changefeed primitive consumed by live tables.
#[async_trait]
pub trait QueryTransport: Send + Sync + 'static {
    /// Open a subscription. The first item on the returned stream is the
    /// initial result.
    async fn subscribe(&self, request: SubscribeRequest) -> Result<MessageStream, TransportError>;

    /// Persist a patch.
    async fn save(&self, patch: SavePatch) -> Result<(), TransportError>;

    /// Release a changefeed. Failure is expected when the feed is already
    /// gone and callers ignore it.
    async fn cancel(&self, id: &SubscriptionId) -> Result<(), TransportError>;
}
