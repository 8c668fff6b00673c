//! synctable core - data types for live table synchronization
//!
//! Records, table schemas, query descriptors, changefeed messages, errors
//! and configuration. No I/O happens here; the sync crate drives these types
//! against a transport.

pub mod change;
pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod schema;
pub mod view;

pub use change::{ChangeEvent, QueryMessage, SubscriptionId, WriteToken};
pub use config::{SuppressionStrategy, SyncConfig};
pub use error::{
    ConfigError, QueryError, SchemaError, SyncError, SyncResult, TransportError, ValidationError,
};
pub use query::{QueryClause, QueryDescriptor, QueryInput, QueryOptions, DEFAULT_LIMIT};
pub use record::{merge_record, record, KeyPart, PrimaryKey, Record};
pub use schema::{FieldSpec, FieldType, SchemaProvider, SchemaRegistry, TableSchema};
pub use view::{TableView, ViewRegistry};

/// Field stamped by the server on writes to tables that require it.
pub const LAST_EDITED_FIELD: &str = "last_edited";

/// Sentinel understood by the remote store as "the current server time".
pub const SERVER_NOW: &str = "NOW()";
