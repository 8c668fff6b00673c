//! Table schema metadata and the schema provider seam.
//!
//! Schemas are validated once, when they are built or registered. After
//! that, key extraction only checks the record against already-validated
//! field names and types.

use crate::error::{SchemaError, ValidationError};
use crate::record::{KeyPart, PrimaryKey, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// Declared type of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Number,
    Boolean,
    /// ISO-8601 string on the wire.
    Timestamp,
    Uuid,
    /// Anything JSON; never type-checked.
    Json,
}

impl FieldType {
    /// Whether a non-null JSON value is acceptable for this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Text | FieldType::Timestamp | FieldType::Uuid => value.is_string(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A registered field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

/// Metadata for one table: fields, primary key, write requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    fields: Vec<FieldSpec>,
    primary_keys: Vec<String>,
    /// Writes must carry a server-stamped `last_edited`.
    stamps_last_edited: bool,
}

impl TableSchema {
    /// Start building a schema for `name`.
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            primary_keys: Vec::new(),
            stamps_last_edited: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_keys.iter().any(|k| k == field)
    }

    pub fn stamps_last_edited(&self) -> bool {
        self.stamps_last_edited
    }

    /// Extract the primary-key tuple of `record`.
    ///
    /// Every key field must be present, non-null and of its declared type.
    pub fn primary_key_of(&self, record: &Record) -> Result<PrimaryKey, ValidationError> {
        let mut parts = Vec::with_capacity(self.primary_keys.len());
        for key in &self.primary_keys {
            let value = record
                .get(key)
                .filter(|v| !v.is_null())
                .ok_or_else(|| ValidationError::MissingPrimaryKey {
                    table: self.name.clone(),
                    field: key.clone(),
                })?;
            // Keys are validated against registered fields at build time.
            let field_type = self
                .field(key)
                .map(|f| f.field_type)
                .unwrap_or(FieldType::Json);
            if !field_type.accepts(value) {
                return Err(ValidationError::PrimaryKeyType {
                    table: self.name.clone(),
                    field: key.clone(),
                    expected: field_type.name().to_string(),
                    got: json_kind(value).to_string(),
                });
            }
            if let Some(part) = KeyPart::from_value(value) {
                parts.push(part);
            }
        }
        Ok(PrimaryKey::new(parts))
    }

    /// Copy only the primary-key fields of `record`.
    pub fn pick_primary_key(&self, record: &Record) -> Result<Record, ValidationError> {
        // Validates presence and types.
        self.primary_key_of(record)?;
        Ok(self
            .primary_keys
            .iter()
            .filter_map(|k| record.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }
}

/// Builder for [`TableSchema`]; `build` performs all validation.
#[derive(Debug, Clone)]
pub struct TableSchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    primary_keys: Vec<String>,
    stamps_last_edited: bool,
}

impl TableSchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
        });
        self
    }

    pub fn primary_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Require a server-stamped `last_edited` on every write.
    pub fn stamp_last_edited(mut self) -> Self {
        self.stamps_last_edited = true;
        self
    }

    pub fn build(self) -> Result<TableSchema, SchemaError> {
        check_identifier(&self.name)?;

        let mut seen = HashSet::new();
        for field in &self.fields {
            check_identifier(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        if self.primary_keys.is_empty() {
            return Err(SchemaError::EmptyPrimaryKey { table: self.name });
        }
        let mut seen_keys = HashSet::new();
        for key in &self.primary_keys {
            if !seen.contains(key.as_str()) {
                return Err(SchemaError::UnknownPrimaryKeyField {
                    table: self.name.clone(),
                    field: key.clone(),
                });
            }
            if !seen_keys.insert(key.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: self.name.clone(),
                    field: key.clone(),
                });
            }
        }

        Ok(TableSchema {
            name: self.name,
            fields: self.fields,
            primary_keys: self.primary_keys,
            stamps_last_edited: self.stamps_last_edited,
        })
    }
}

/// Source of table metadata, injected wherever schemas are consulted.
pub trait SchemaProvider: Send + Sync {
    /// Look up a table by name.
    fn table(&self, name: &str) -> Option<Arc<TableSchema>>;
}

/// In-process schema registry.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated schema. Table names are unique.
    pub fn register(&mut self, schema: TableSchema) -> Result<Arc<TableSchema>, SchemaError> {
        if self.tables.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateTable {
                table: schema.name().to_string(),
            });
        }
        let schema = Arc::new(schema);
        self.tables
            .insert(schema.name().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SchemaProvider for SchemaRegistry {
    fn table(&self, name: &str) -> Option<Arc<TableSchema>> {
        self.tables.get(name).cloned()
    }
}

impl<P: SchemaProvider + ?Sized> SchemaProvider for Arc<P> {
    fn table(&self, name: &str) -> Option<Arc<TableSchema>> {
        (**self).table(name)
    }
}
