//! Optimistic save pipeline.
//!
//! A save sends the record's primary key plus the changed fields as a
//! partial upsert. The local mirror is not touched; the changefeed echo
//! brings the new values back. While a save is in flight the table reports
//! `saving`, and a failure lands in the error banner. Saves are not retried.

use std::sync::Arc;

use serde_json::{json, Value};
use synctable_core::{
    QueryOptions, Record, SuppressionStrategy, SyncResult, TableSchema, ValidationError,
    WriteToken, LAST_EDITED_FIELD, SERVER_NOW,
};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::guard::RefreshSuppressor;
use crate::snapshot::{ErrorBanner, TableSnapshot};
use crate::transport::QueryTransport;

/// A partial upsert ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SavePatch {
    pub table: String,
    pub fields: Record,
    pub write_token: Option<WriteToken>,
}

impl SavePatch {
    /// Primary key of `record`, overlaid with `changed`, plus a server-side
    /// `last_edited` stamp when the table requires one.
    pub fn build(
        schema: &TableSchema,
        record: &Record,
        changed: Record,
        write_token: Option<WriteToken>,
    ) -> Result<Self, ValidationError> {
        let mut fields = schema.pick_primary_key(record)?;
        fields.extend(changed);
        if schema.stamps_last_edited() {
            fields.insert(LAST_EDITED_FIELD.to_string(), json!(SERVER_NOW));
        }
        Ok(Self {
            table: schema.name().to_string(),
            fields,
            write_token,
        })
    }

    /// Wire form: `{ query: {table: fields}, options: [{set: true}] }`, plus
    /// `write_token` when tagged.
    pub fn to_json(&self) -> Value {
        let mut query = serde_json::Map::new();
        query.insert(self.table.clone(), Value::Object(self.fields.clone()));
        let mut out = json!({
            "query": query,
            "options": QueryOptions::write(),
        });
        if let (Some(token), Some(obj)) = (self.write_token, out.as_object_mut()) {
            obj.insert("write_token".to_string(), json!(token));
        }
        out
    }
}

pub(crate) type SharedSuppressor = Arc<Mutex<Box<dyn RefreshSuppressor>>>;

/// Marks one save as in flight for as long as it lives.
struct SavingFlag {
    state: Arc<watch::Sender<TableSnapshot>>,
}

impl SavingFlag {
    fn raise(state: &Arc<watch::Sender<TableSnapshot>>) -> Self {
        state.send_modify(|s| {
            s.saves_in_flight += 1;
            s.error = None;
        });
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for SavingFlag {
    fn drop(&mut self) {
        self.state
            .send_modify(|s| s.saves_in_flight = s.saves_in_flight.saturating_sub(1));
    }
}

/// Issues saves for one live table.
pub struct SavePipeline<T: QueryTransport> {
    transport: Arc<T>,
    schema: Arc<TableSchema>,
    strategy: SuppressionStrategy,
    guard: SharedSuppressor,
    state: Arc<watch::Sender<TableSnapshot>>,
}

impl<T: QueryTransport> Clone for SavePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            schema: Arc::clone(&self.schema),
            strategy: self.strategy,
            guard: Arc::clone(&self.guard),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: QueryTransport> SavePipeline<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        schema: Arc<TableSchema>,
        strategy: SuppressionStrategy,
        guard: SharedSuppressor,
        state: Arc<watch::Sender<TableSnapshot>>,
    ) -> Self {
        Self {
            transport,
            schema,
            strategy,
            guard,
            state,
        }
    }

    /// Persist `changed` for the row identified by `record`'s primary key.
    ///
    /// A record without a valid primary key fails before anything is sent.
    /// Transport failures set the error banner and are returned.
    pub async fn save(&self, record: &Record, changed: Record) -> SyncResult<()> {
        let token = match self.strategy {
            SuppressionStrategy::WriteToken => Some(WriteToken::generate()),
            SuppressionStrategy::SaveWindow => None,
        };
        let patch = SavePatch::build(&self.schema, record, changed, token)?;

        self.guard.lock().await.record_save(token, Instant::now());
        let _saving = SavingFlag::raise(&self.state);

        debug!(
            table = %patch.table,
            fields = patch.fields.len(),
            write_token = ?token,
            "Saving record"
        );
        match self.transport.save(patch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(table = %self.schema.name(), error = %e, "Save failed");
                if let Some(token) = token {
                    self.guard.lock().await.save_failed(token);
                }
                self.state
                    .send_modify(|s| s.error = Some(ErrorBanner::new(e.to_string())));
                Err(e.into())
            }
        }
    }
}
