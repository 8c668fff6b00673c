//! Live tables.
//!
//! [`LiveTable::open`] spawns a driver task that owns the mirror, the
//! debouncer and the subscription. The handle sends commands to it and
//! observes its [`TableSnapshot`] through a `watch` channel. Saves go
//! straight to the transport from the handle and never wait on the driver.

use std::collections::BTreeSet;
use std::sync::Arc;

use synctable_core::{
    ChangeEvent, QueryDescriptor, QueryError, QueryInput, QueryMessage, QueryOptions, Record,
    SchemaProvider, SubscriptionId, SyncConfig, SyncError, SyncResult, TableSchema,
    TransportError, WriteToken,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::debounce::{DebounceDecision, Debouncer};
use crate::guard::{suppressor_for, RefreshTrigger};
use crate::mirror::TableMirror;
use crate::save::{SavePipeline, SharedSuppressor};
use crate::snapshot::{ErrorBanner, SubscriptionState, TableSnapshot};
use crate::subscription::{FeedEvent, SubscriptionManager};
use crate::transport::{QueryTransport, SubscribeRequest};

/// Caller-controlled subscription parameters. Each one is a debounce
/// trigger when it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableParams {
    /// Sort fields, primary key first.
    pub sort_fields: Vec<String>,
    /// Fields left out of the fetch. Primary keys are always fetched.
    pub hidden_fields: BTreeSet<String>,
    /// Row limit; the configured default when unset.
    pub limit: Option<u32>,
}

#[derive(Debug)]
enum Command {
    SortFields(Vec<String>),
    HiddenFields(BTreeSet<String>),
    Limit(Option<u32>),
    Query(QueryDescriptor),
    Refresh,
    Close(oneshot::Sender<()>),
}

/// Handle to a live, self-updating table.
pub struct LiveTable<T: QueryTransport> {
    table: String,
    schema: Arc<TableSchema>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TableSnapshot>,
    saver: SavePipeline<T>,
    task: JoinHandle<()>,
}

impl<T: QueryTransport> LiveTable<T> {
    /// Open a live table with default parameters.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        query: impl Into<QueryInput>,
        schemas: &dyn SchemaProvider,
        transport: Arc<T>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::open_with(query, schemas, transport, config, TableParams::default())
    }

    /// Open a live table. The first subscription is sent immediately.
    pub fn open_with(
        query: impl Into<QueryInput>,
        schemas: &dyn SchemaProvider,
        transport: Arc<T>,
        config: SyncConfig,
        params: TableParams,
    ) -> SyncResult<Self> {
        let query = QueryDescriptor::normalize(query, schemas)?;
        let table = query.table().to_string();
        let schema = schemas
            .table(&table)
            .ok_or_else(|| QueryError::UnknownTable {
                table: table.clone(),
            })?;

        let (state_tx, state) = watch::channel(TableSnapshot::new(table.clone()));
        let state_tx = Arc::new(state_tx);
        let guard: SharedSuppressor = Arc::new(Mutex::new(suppressor_for(&config)));
        let saver = SavePipeline::new(
            Arc::clone(&transport),
            Arc::clone(&schema),
            config.suppression,
            Arc::clone(&guard),
            Arc::clone(&state_tx),
        );
        let (commands, command_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            table: table.clone(),
            schema: Arc::clone(&schema),
            query,
            params,
            mirror: TableMirror::new(Arc::clone(&schema)),
            subscription: SubscriptionManager::new(transport, table.clone()),
            debouncer: Debouncer::new(config.debounce_window()),
            config,
            guard,
            state: state_tx,
            commands: command_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            table,
            schema,
            commands,
            state,
            saver,
            task,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn primary_keys(&self) -> &[String] {
        self.schema.primary_keys()
    }

    /// Current state.
    pub fn snapshot(&self) -> TableSnapshot {
        self.state.borrow().clone()
    }

    pub fn records(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.state.borrow().records)
    }

    /// A receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<TableSnapshot> {
        self.state.clone()
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TableSnapshot) -> bool,
    ) -> SyncResult<TableSnapshot> {
        let mut rx = self.state.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| self.stopped())?;
        Ok(snapshot.clone())
    }

    pub fn set_sort_fields(&self, sort_fields: Vec<String>) -> SyncResult<()> {
        self.send(Command::SortFields(sort_fields))
    }

    pub fn set_hidden_fields(&self, hidden: BTreeSet<String>) -> SyncResult<()> {
        self.send(Command::HiddenFields(hidden))
    }

    pub fn set_limit(&self, limit: Option<u32>) -> SyncResult<()> {
        self.send(Command::Limit(limit))
    }

    /// Change the query shape. The table itself cannot change.
    pub fn set_query(
        &self,
        query: impl Into<QueryInput>,
        schemas: &dyn SchemaProvider,
    ) -> SyncResult<()> {
        let query = QueryDescriptor::normalize(query, schemas)?;
        if query.table() != self.table {
            return Err(QueryError::TableMismatch {
                expected: self.table.clone(),
                got: query.table().to_string(),
            }
            .into());
        }
        self.send(Command::Query(query))
    }

    /// Force a debounced resubscription.
    pub fn refresh(&self) -> SyncResult<()> {
        self.send(Command::Refresh)
    }

    /// Save `changed` for the row identified by `record`'s primary key.
    pub async fn save(&self, record: &Record, changed: Record) -> SyncResult<()> {
        if self.commands.is_closed() {
            return Err(self.stopped());
        }
        self.saver.save(record, changed).await
    }

    /// A save pipeline usable independently of this handle.
    pub fn saver(&self) -> SavePipeline<T> {
        self.saver.clone()
    }

    /// Cancel the subscription and stop the driver.
    pub async fn close(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            warn!(table = %self.table, error = %e, "Live table driver did not shut down cleanly");
        }
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> SyncError {
        SyncError::DriverStopped {
            table: self.table.clone(),
        }
    }
}

enum Step {
    Command(Option<Command>),
    Feed(FeedEvent),
    Deadline,
}

struct Driver<T: QueryTransport> {
    table: String,
    schema: Arc<TableSchema>,
    query: QueryDescriptor,
    params: TableParams,
    config: SyncConfig,
    mirror: TableMirror,
    subscription: SubscriptionManager<T>,
    debouncer: Debouncer,
    guard: SharedSuppressor,
    state: Arc<watch::Sender<TableSnapshot>>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<T: QueryTransport> Driver<T> {
    async fn run(mut self) {
        info!(table = %self.table, "Live table started");
        self.trigger().await;

        loop {
            let deadline = self.debouncer.deadline();
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = self.subscription.next_event() => Step::Feed(event),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::Deadline
                }
            };

            match step {
                Step::Command(Some(Command::Close(reply))) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
                Step::Command(Some(command)) => self.apply(command).await,
                // Every handle is gone.
                Step::Command(None) => break,
                Step::Feed(event) => self.on_feed(event).await,
                Step::Deadline => {
                    if self.debouncer.poll(Instant::now()) && self.resubscribe().await {
                        self.debouncer.rearm(Instant::now());
                    }
                }
            }
        }
        self.shutdown().await;
    }

    async fn apply(&mut self, command: Command) {
        let changed = match command {
            Command::SortFields(fields) => replace_if_changed(&mut self.params.sort_fields, fields),
            Command::HiddenFields(hidden) => {
                replace_if_changed(&mut self.params.hidden_fields, hidden)
            }
            Command::Limit(limit) => replace_if_changed(&mut self.params.limit, limit),
            Command::Query(query) => replace_if_changed(&mut self.query, query),
            Command::Refresh => true,
            Command::Close(_) => false,
        };
        if changed {
            self.trigger().await;
        }
    }

    /// Register a debounce trigger and resubscribe if it fires. A
    /// disconnect retries once at the end of the window it opened.
    async fn trigger(&mut self) {
        if self.debouncer.trigger(Instant::now()) == DebounceDecision::Fire
            && self.resubscribe().await
        {
            self.debouncer.rearm(Instant::now());
        }
    }

    fn request(&self) -> SubscribeRequest {
        let limit = self.params.limit.unwrap_or(self.config.default_limit);
        SubscribeRequest {
            query: self
                .query
                .without_hidden(&self.params.hidden_fields, &self.schema),
            options: QueryOptions::subscription(Some(limit), &self.params.sort_fields),
            changes: self.config.changes,
        }
    }

    /// Replace the subscription. Returns true when the transport reported
    /// a disconnect and another trigger is due.
    async fn resubscribe(&mut self) -> bool {
        let request = self.request();
        self.state.send_modify(|s| {
            s.loading = true;
            s.subscription = SubscriptionState::Subscribing;
        });

        match self.subscription.open(request).await {
            Ok(()) => {
                let state = self.subscription.state();
                self.state.send_modify(|s| {
                    s.subscriptions_opened += 1;
                    s.subscription = state;
                });
                false
            }
            Err(e) if e.is_disconnect() => {
                self.on_disconnect();
                true
            }
            Err(e) => {
                let state = self.subscription.state();
                self.state.send_modify(|s| s.subscription = state);
                self.report(e.into());
                false
            }
        }
    }

    async fn on_feed(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Message(QueryMessage::Initial { id, table, records }) => {
                self.on_initial(id, table, records)
            }
            FeedEvent::Message(QueryMessage::Change { event, origin }) => {
                self.on_change(event, origin).await
            }
            FeedEvent::Error(e) if e.is_disconnect() => {
                self.on_disconnect();
                self.trigger().await;
            }
            FeedEvent::Error(e) => self.report(e.into()),
            FeedEvent::Ended if self.subscription.expects_changes() => {
                debug!(table = %self.table, "Changefeed ended");
                self.on_disconnect();
                self.trigger().await;
            }
            FeedEvent::Ended => {
                self.subscription.mark_idle();
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.subscription = SubscriptionState::Idle;
                });
            }
        }
    }

    fn on_initial(&mut self, id: Option<SubscriptionId>, table: String, records: Vec<Record>) {
        if table != self.table {
            self.report(
                TransportError::MalformedResponse {
                    reason: format!("initial result for {table}, expected {}", self.table),
                }
                .into(),
            );
            return;
        }
        self.subscription.mark_live(id);
        if let Err(e) = self.mirror.replace(records) {
            self.report(e.into());
            return;
        }
        debug!(table = %self.table, records = self.mirror.len(), "Initial result");
        let records = Arc::new(self.mirror.records().to_vec());
        let version = self.mirror.version();
        self.state.send_modify(|s| {
            s.records = records;
            s.version = version;
            s.refresh_counter += 1;
            s.loading = false;
            s.error = None;
            s.subscription = SubscriptionState::Live;
        });
    }

    async fn on_change(&mut self, event: ChangeEvent, origin: Option<WriteToken>) {
        let change = match self.mirror.apply_change(&event) {
            Ok(change) => change,
            Err(e) => {
                self.report(e.into());
                return;
            }
        };
        if !change.is_mutation() {
            self.state.send_if_modified(|s| s.error.take().is_some());
            return;
        }

        let suppressed = self
            .guard
            .lock()
            .await
            .should_suppress_refresh(&RefreshTrigger::change(origin), Instant::now());
        if suppressed {
            debug!(table = %self.table, ?change, "Refresh suppressed after save");
        }
        let records = Arc::new(self.mirror.records().to_vec());
        let version = self.mirror.version();
        self.state.send_modify(|s| {
            s.records = records;
            s.version = version;
            if !suppressed {
                s.refresh_counter += 1;
            }
            s.error = None;
        });
    }

    fn on_disconnect(&mut self) {
        self.subscription.mark_disconnected();
        self.state.send_modify(|s| {
            s.disconnects += 1;
            s.loading = false;
            s.subscription = SubscriptionState::Disconnected;
        });
        info!(table = %self.table, "Disconnected, resubscribing");
    }

    fn report(&self, error: SyncError) {
        warn!(table = %self.table, error = %error, "Live table error");
        let banner = ErrorBanner::new(error.to_string());
        self.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(banner);
        });
    }

    async fn shutdown(&mut self) {
        self.debouncer.reset();
        self.subscription.cancel().await;
        self.state.send_modify(|s| {
            s.loading = false;
            s.subscription = SubscriptionState::Cancelled;
        });
    }
}

fn replace_if_changed<V: PartialEq>(slot: &mut V, value: V) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
