//! Error types for synctable operations

use thiserror::Error;

/// Malformed or unresolvable query descriptors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query must name exactly one table, found {count}")]
    TableCount { count: usize },

    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    #[error("Malformed query for {table}: {reason}")]
    MalformedTemplate { table: String, reason: String },

    #[error("Query must be a table name or an object, got {kind}")]
    UnsupportedShape { kind: String },

    #[error("Live table is bound to {expected}, cannot switch to {got}")]
    TableMismatch { expected: String, got: String },
}

/// Schema registration errors. Raised once, when a table is registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table {table} declares no primary key")]
    EmptyPrimaryKey { table: String },

    #[error("Primary key {field} of table {table} is not a registered field")]
    UnknownPrimaryKeyField { table: String, field: String },

    #[error("Field {field} declared twice in table {table}")]
    DuplicateField { table: String, field: String },

    #[error("Invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("Table already registered: {table}")]
    DuplicateTable { table: String },

    #[error("View already registered: {name}")]
    DuplicateView { name: String },
}

/// Record-level validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Record for {table} is missing primary key field {field}")]
    MissingPrimaryKey { table: String, field: String },

    #[error("Primary key {field} of {table} expects {expected}, got {got}")]
    PrimaryKeyType {
        table: String,
        field: String,
        expected: String,
        got: String,
    },

    #[error("Expected a JSON object for a {table} record")]
    NotAnObject { table: String },
}

/// Errors reported by the query transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection dropped. Never surfaced to users; it forces a
    /// re-subscription instead.
    #[error("disconnect")]
    Disconnected,

    #[error("Remote error: {message}")]
    Remote { message: String },

    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl TransportError {
    /// Build a remote error from anything displayable.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Returns true for the distinguished disconnect condition.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or SYNCTABLE_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all synctable errors.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Table driver for {table} has shut down")]
    DriverStopped { table: String },
}

/// Result type alias for synctable operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
