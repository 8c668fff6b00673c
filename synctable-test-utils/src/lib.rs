//! synctable Test Utilities
//!
//! Shared test infrastructure for the synctable workspace:
//! - An in-memory `QueryTransport` with a server-side table store
//! - Proptest generators for records and change events
//! - Fixtures for the schemas used across tests
//! - Assertions over table snapshots

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

// Re-export the types most tests need
pub use synctable_core::{
    record, ChangeEvent, FieldType, PrimaryKey, QueryDescriptor, QueryMessage, Record,
    SchemaProvider, SchemaRegistry, SubscriptionId, SyncConfig, SyncError, SyncResult,
    TableSchema, TransportError, WriteToken,
};
pub use synctable_sync::{
    LiveTable, MessageStream, QueryTransport, SavePatch, SubscribeRequest, SubscriptionState,
    TableMirror, TableParams, TableSnapshot,
};

/// Buffered messages per mock changefeed.
const FEED_CAPACITY: usize = 256;

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

struct Feed {
    id: SubscriptionId,
    table: String,
    fields: Vec<String>,
    tx: mpsc::Sender<Result<QueryMessage, TransportError>>,
}

impl Feed {
    fn deliver(&self, message: Result<QueryMessage, TransportError>) {
        // A full or closed feed drops the message, like a lagging client.
        let _ = self.tx.try_send(message);
    }
}

#[derive(Default)]
struct MockState {
    tables: HashMap<String, TableMirror>,
    feeds: Vec<Feed>,
    requests: Vec<SubscribeRequest>,
    saves: Vec<SavePatch>,
    cancels: Vec<SubscriptionId>,
    next_feed: u64,
    fail_next_subscribe: Option<TransportError>,
    fail_next_save: Option<TransportError>,
    fail_cancels: bool,
    echo_write_tokens: bool,
}

/// In-memory query server.
///
/// Subscriptions get the current rows of their table as the initial
/// result. Saves are applied to the stored rows and broadcast to every
/// open changefeed of that table.
pub struct MockTransport {
    schemas: SchemaRegistry,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(schemas: SchemaRegistry) -> Self {
        let mut state = MockState::default();
        for name in schemas.table_names() {
            if let Some(schema) = schemas.table(name) {
                state.tables.insert(name.to_string(), TableMirror::new(schema));
            }
        }
        Self {
            schemas,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Replace the stored rows of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        let mut state = self.state();
        if let Some(mirror) = state.tables.get_mut(table) {
            mirror.replace(rows).expect("seed rows must carry primary keys");
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state()
            .tables
            .get(table)
            .map(|m| m.records().to_vec())
            .unwrap_or_default()
    }

    /// Apply an upsert server-side and broadcast it.
    pub fn push_upsert(&self, table: &str, row: Record) {
        self.push_change(table, ChangeEvent::Upsert(row), None);
    }

    /// Apply a delete server-side and broadcast it.
    pub fn push_delete(&self, table: &str, row: Record) {
        self.push_change(table, ChangeEvent::Delete(row), None);
    }

    pub fn push_change(&self, table: &str, event: ChangeEvent, origin: Option<WriteToken>) {
        let mut state = self.state();
        if let Some(mirror) = state.tables.get_mut(table) {
            let _ = mirror.apply_change(&event);
        }
        broadcast(&state, table, &event, origin);
    }

    /// Send a raw item to every feed of `table` without touching stored rows.
    pub fn push_raw(&self, table: &str, message: Result<QueryMessage, TransportError>) {
        let state = self.state();
        for feed in state.feeds.iter().filter(|f| f.table == table) {
            feed.deliver(message.clone());
        }
    }

    /// Report a disconnect on every open feed, then drop them.
    pub fn disconnect_all(&self) {
        let mut state = self.state();
        for feed in state.feeds.drain(..) {
            feed.deliver(Err(TransportError::Disconnected));
        }
    }

    /// Close every open feed without an error.
    pub fn close_all_feeds(&self) {
        self.state().feeds.clear();
    }

    pub fn fail_next_subscribe(&self, error: TransportError) {
        self.state().fail_next_subscribe = Some(error);
    }

    pub fn fail_next_save(&self, error: TransportError) {
        self.state().fail_next_save = Some(error);
    }

    /// Make every cancel fail.
    pub fn fail_cancels(&self, fail: bool) {
        self.state().fail_cancels = fail;
    }

    /// Tag broadcast changes with the write token of the save behind them.
    pub fn echo_write_tokens(&self, echo: bool) {
        self.state().echo_write_tokens = echo;
    }

    pub fn requests(&self) -> Vec<SubscribeRequest> {
        self.state().requests.clone()
    }

    pub fn last_request(&self) -> Option<SubscribeRequest> {
        self.state().requests.last().cloned()
    }

    pub fn subscribe_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn saves(&self) -> Vec<SavePatch> {
        self.state().saves.clone()
    }

    pub fn cancels(&self) -> Vec<SubscriptionId> {
        self.state().cancels.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.state().cancels.len()
    }

    pub fn active_feeds(&self) -> usize {
        self.state().feeds.iter().filter(|f| !f.tx.is_closed()).count()
    }
}

fn project(row: &Record, fields: &[String]) -> Record {
    fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

fn broadcast(state: &MockState, table: &str, event: &ChangeEvent, origin: Option<WriteToken>) {
    for feed in state.feeds.iter().filter(|f| f.table == table) {
        let event = match event {
            ChangeEvent::Upsert(row) => ChangeEvent::Upsert(project(row, &feed.fields)),
            ChangeEvent::Delete(row) => ChangeEvent::Delete(row.clone()),
        };
        feed.deliver(Ok(QueryMessage::Change { event, origin }));
    }
}

#[async_trait]
impl QueryTransport for MockTransport {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<MessageStream, TransportError> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if let Some(e) = state.fail_next_subscribe.take() {
            return Err(e);
        }

        let table = request.table().to_string();
        let fields: Vec<String> = request.query.template().keys().cloned().collect();
        let limit = request.options.limit().map(|n| n as usize).unwrap_or(usize::MAX);
        let mut rows: Vec<Record> = state
            .tables
            .get(&table)
            .map(|m| m.records().iter().map(|r| project(r, &fields)).collect())
            .unwrap_or_default();
        if let Some(field) = request.options.order_by().next() {
            rows.sort_by(|a, b| {
                let a = a.get(field).map(|v| v.to_string()).unwrap_or_default();
                let b = b.get(field).map(|v| v.to_string()).unwrap_or_default();
                a.cmp(&b)
            });
        }
        rows.truncate(limit);

        state.next_feed += 1;
        let id = SubscriptionId::new(format!("feed-{}", state.next_feed));
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let initial = QueryMessage::Initial {
            id: request.changes.then(|| id.clone()),
            table: table.clone(),
            records: rows,
        };
        let _ = tx.try_send(Ok(initial));
        if request.changes {
            state.feeds.push(Feed {
                id,
                table,
                fields,
                tx,
            });
        }
        Ok(rx)
    }

    async fn save(&self, patch: SavePatch) -> Result<(), TransportError> {
        let mut state = self.state();
        state.saves.push(patch.clone());
        if let Some(e) = state.fail_next_save.take() {
            return Err(e);
        }

        let mirror = state
            .tables
            .get_mut(&patch.table)
            .ok_or_else(|| TransportError::remote(format!("no such table {}", patch.table)))?;
        mirror
            .apply_change(&ChangeEvent::Upsert(patch.fields.clone()))
            .map_err(|e| TransportError::remote(e.to_string()))?;
        let key = mirror
            .schema()
            .primary_key_of(&patch.fields)
            .map_err(|e| TransportError::remote(e.to_string()))?;
        let stored = mirror.get(&key).cloned().unwrap_or_else(|| patch.fields.clone());

        let origin = if state.echo_write_tokens {
            patch.write_token
        } else {
            None
        };
        broadcast(&state, &patch.table, &ChangeEvent::Upsert(stored), origin);
        Ok(())
    }

    async fn cancel(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let mut state = self.state();
        state.cancels.push(id.clone());
        if state.fail_cancels {
            return Err(TransportError::remote("cancel failed"));
        }
        let before = state.feeds.len();
        state.feeds.retain(|f| &f.id != id);
        if state.feeds.len() == before {
            return Err(TransportError::remote(format!("unknown changefeed {id}")));
        }
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies over the `t` fixture table.

    use super::*;
    use proptest::prelude::*;

    /// A `t` row with an id in `0..max_id`.
    pub fn arb_person(max_id: i64) -> impl Strategy<Value = Record> {
        (0..max_id, "[a-z]{1,3}").prop_map(|(id, name)| fixtures::person(id, &name))
    }

    /// Upserts and deletes over a small id space so events collide often.
    pub fn arb_change_event() -> impl Strategy<Value = ChangeEvent> {
        prop_oneof![
            3 => arb_person(8).prop_map(ChangeEvent::Upsert),
            1 => (0i64..8).prop_map(|id| ChangeEvent::Delete(record([("id", json!(id))]))),
        ]
    }

    pub fn arb_event_sequence(max_len: usize) -> impl Strategy<Value = Vec<ChangeEvent>> {
        prop::collection::vec(arb_change_event(), 0..max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Schemas and rows shared across tests.

    use super::*;

    /// `t(id integer pk, name text, email text)`.
    pub fn people_schema() -> TableSchema {
        TableSchema::builder("t")
            .field("id", FieldType::Integer)
            .field("name", FieldType::Text)
            .field("email", FieldType::Text)
            .primary_key(["id"])
            .build()
            .expect("fixture schema is valid")
    }

    /// CRM accounts; writes are stamped with `last_edited`.
    pub fn crm_accounts_schema() -> TableSchema {
        TableSchema::builder("crm_accounts")
            .field("account_id", FieldType::Uuid)
            .field("first_name", FieldType::Text)
            .field("last_name", FieldType::Text)
            .field("email_address", FieldType::Text)
            .field("last_active", FieldType::Timestamp)
            .field("created", FieldType::Timestamp)
            .field("last_edited", FieldType::Timestamp)
            .primary_key(["account_id"])
            .stamp_last_edited()
            .build()
            .expect("fixture schema is valid")
    }

    /// Project memberships, keyed on two columns.
    pub fn crm_memberships_schema() -> TableSchema {
        TableSchema::builder("crm_memberships")
            .field("project_id", FieldType::Uuid)
            .field("account_id", FieldType::Uuid)
            .field("role", FieldType::Text)
            .primary_key(["project_id", "account_id"])
            .build()
            .expect("fixture schema is valid")
    }

    pub fn sample_schemas() -> SchemaRegistry {
        let mut schemas = SchemaRegistry::new();
        for schema in [people_schema(), crm_accounts_schema(), crm_memberships_schema()] {
            schemas.register(schema).expect("fixture tables are unique");
        }
        schemas
    }

    pub fn person(id: i64, name: &str) -> Record {
        record([("id", json!(id)), ("name", json!(name))])
    }

    /// Mock server over [`sample_schemas`].
    pub fn mock_transport() -> std::sync::Arc<MockTransport> {
        std::sync::Arc::new(MockTransport::new(sample_schemas()))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over live table state.

    use super::*;
    use std::collections::HashSet;

    /// Assert the snapshot holds exactly `expected`, in order.
    #[track_caller]
    pub fn assert_records(snapshot: &TableSnapshot, expected: &[Record]) {
        assert_eq!(
            snapshot.records.as_slice(),
            expected,
            "records of {} differ",
            snapshot.table
        );
    }

    /// Assert no two records in `mirror` share a primary key.
    #[track_caller]
    pub fn assert_unique_keys(mirror: &TableMirror) {
        let mut seen = HashSet::new();
        for row in mirror.records() {
            let key = mirror
                .schema()
                .primary_key_of(row)
                .expect("mirror rows carry primary keys");
            assert!(seen.insert(key.clone()), "duplicate primary key {key}");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
