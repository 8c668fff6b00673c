//! Changefeed subscription manager.
//!
//! Holds at most one subscription per live table. Opening a new one
//! releases the previous changefeed first; cancel failures are logged and
//! dropped since the feed is usually already gone when they happen.
//!
//! The changefeed handle only arrives with the initial result. A feed that
//! is superseded before then is drained in the background and cancelled as
//! soon as its handle shows up.

use std::sync::Arc;

use synctable_core::{QueryMessage, SubscriptionId, TransportError};
use tracing::{debug, info};

use crate::snapshot::SubscriptionState;
use crate::transport::{MessageStream, QueryTransport, SubscribeRequest};

/// Next item observed on the active subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Message(QueryMessage),
    Error(TransportError),
    /// The transport closed the stream.
    Ended,
}

pub struct SubscriptionManager<T: QueryTransport> {
    transport: Arc<T>,
    table: String,
    id: Option<SubscriptionId>,
    stream: Option<MessageStream>,
    state: SubscriptionState,
    changes: bool,
}

impl<T: QueryTransport> SubscriptionManager<T> {
    pub fn new(transport: Arc<T>, table: impl Into<String>) -> Self {
        Self {
            transport,
            table: table.into(),
            id: None,
            stream: None,
            state: SubscriptionState::Idle,
            changes: false,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn id(&self) -> Option<&SubscriptionId> {
        self.id.as_ref()
    }

    /// True if the active request asked for a changefeed.
    pub fn expects_changes(&self) -> bool {
        self.changes
    }

    /// Replace the current subscription with one for `request`.
    pub async fn open(&mut self, request: SubscribeRequest) -> Result<(), TransportError> {
        if self.state == SubscriptionState::Cancelled {
            return Ok(());
        }
        self.close().await;
        self.changes = request.changes;
        self.state = SubscriptionState::Subscribing;
        debug!(
            table = %self.table,
            options = ?request.options,
            changes = request.changes,
            "Opening subscription"
        );
        match self.transport.subscribe(request).await {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.state = if e.is_disconnect() {
                    SubscriptionState::Disconnected
                } else {
                    SubscriptionState::Idle
                };
                Err(e)
            }
        }
    }

    /// Release the current changefeed, if any.
    pub async fn close(&mut self) {
        let stream = self.stream.take();
        match (self.id.take(), stream) {
            (Some(id), _) => {
                if let Err(e) = self.transport.cancel(&id).await {
                    debug!(table = %self.table, id = %id, error = %e, "Ignoring cancel failure");
                }
            }
            (None, Some(stream)) if self.changes => self.drain(stream),
            _ => {}
        }
        if self.state != SubscriptionState::Cancelled {
            self.state = SubscriptionState::Idle;
        }
    }

    /// Close and refuse further opens.
    pub async fn cancel(&mut self) {
        self.close().await;
        self.state = SubscriptionState::Cancelled;
        info!(table = %self.table, "Subscription cancelled");
    }

    /// Cancel a feed whose handle has not arrived yet, once it does.
    fn drain(&self, mut stream: MessageStream) {
        let transport = Arc::clone(&self.transport);
        let table = self.table.clone();
        debug!(table = %table, "Draining superseded subscription");
        tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(QueryMessage::Initial { id: Some(id), .. }) => {
                        if let Err(e) = transport.cancel(&id).await {
                            debug!(table = %table, id = %id, error = %e, "Ignoring cancel failure");
                        }
                        return;
                    }
                    Ok(QueryMessage::Initial { id: None, .. }) | Err(_) => return,
                    Ok(QueryMessage::Change { .. }) => {}
                }
            }
        });
    }

    /// Record the changefeed handle from the initial result.
    pub fn mark_live(&mut self, id: Option<SubscriptionId>) {
        self.id = id;
        self.state = SubscriptionState::Live;
    }

    /// Forget the current feed after a disconnect. The server side is gone,
    /// so no cancel is sent.
    pub fn mark_disconnected(&mut self) {
        self.stream = None;
        self.id = None;
        self.state = SubscriptionState::Disconnected;
    }

    /// Forget a feed that ended without changefeed semantics.
    pub fn mark_idle(&mut self) {
        self.stream = None;
        self.id = None;
        self.state = SubscriptionState::Idle;
    }

    /// Wait for the next item. Never resolves while no stream is open.
    pub async fn next_event(&mut self) -> FeedEvent {
        match self.stream.as_mut() {
            Some(stream) => match stream.recv().await {
                Some(Ok(message)) => FeedEvent::Message(message),
                Some(Err(e)) => FeedEvent::Error(e),
                None => FeedEvent::Ended,
            },
            None => std::future::pending().await,
        }
    }
}
