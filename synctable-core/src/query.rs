//! Query descriptors: normalization, hidden-field narrowing and options.
//!
//! A canonical query names exactly one table and carries a single record
//! template; every field in the template with a `null` value is fetched.

use crate::error::QueryError;
use crate::record::Record;
use crate::schema::{SchemaProvider, TableSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Limit applied to subscriptions that do not set one.
pub const DEFAULT_LIMIT: u32 = 100;

/// Shorthand query as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// Bare table name: fetch every registered field.
    Table(String),
    /// `{ table: template }` or `{ table: [template] }`.
    Object(Value),
}

impl From<&str> for QueryInput {
    fn from(table: &str) -> Self {
        Self::Table(table.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(table: String) -> Self {
        Self::Table(table)
    }
}

impl From<Value> for QueryInput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(table) => Self::Table(table),
            other => Self::Object(other),
        }
    }
}

/// Fully expanded query over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    table: String,
    template: Record,
}

impl QueryDescriptor {
    /// Canonicalize `input` against the schemas known to `schemas`.
    pub fn normalize(
        input: impl Into<QueryInput>,
        schemas: &dyn SchemaProvider,
    ) -> Result<Self, QueryError> {
        match input.into() {
            QueryInput::Table(table) => {
                let schema = schemas
                    .table(&table)
                    .ok_or(QueryError::UnknownTable { table })?;
                Ok(Self::all_fields(&schema))
            }
            QueryInput::Object(Value::Object(map)) => {
                if map.len() != 1 {
                    return Err(QueryError::TableCount { count: map.len() });
                }
                let Some((table, value)) = map.into_iter().next() else {
                    return Err(QueryError::TableCount { count: 0 });
                };
                if schemas.table(&table).is_none() {
                    return Err(QueryError::UnknownTable { table });
                }
                let template = match value {
                    Value::Object(template) => template,
                    Value::Array(mut items) => {
                        if items.len() != 1 {
                            return Err(QueryError::MalformedTemplate {
                                table,
                                reason: format!("expected one record template, got {}", items.len()),
                            });
                        }
                        match items.remove(0) {
                            Value::Object(template) => template,
                            other => {
                                return Err(QueryError::MalformedTemplate {
                                    table,
                                    reason: format!("template must be an object, got {}", other),
                                })
                            }
                        }
                    }
                    other => {
                        return Err(QueryError::MalformedTemplate {
                            table,
                            reason: format!("template must be an object, got {}", other),
                        })
                    }
                };
                Ok(Self { table, template })
            }
            QueryInput::Object(other) => Err(QueryError::UnsupportedShape {
                kind: match other {
                    Value::Null => "null",
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::Array(_) => "array",
                    _ => "value",
                }
                .to_string(),
            }),
        }
    }

    /// Query fetching every registered field of `schema`.
    pub fn all_fields(schema: &TableSchema) -> Self {
        Self {
            table: schema.name().to_string(),
            template: schema
                .field_names()
                .map(|f| (f.to_string(), Value::Null))
                .collect(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn template(&self) -> &Record {
        &self.template
    }

    /// Names of the fields this query fetches (template entries set to null).
    pub fn fetch_fields(&self) -> BTreeSet<String> {
        self.template
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Copy of this query with `hidden` fields removed from the template.
    /// Primary-key fields of `schema` are never removed.
    pub fn without_hidden(&self, hidden: &BTreeSet<String>, schema: &TableSchema) -> Self {
        if hidden.is_empty() {
            return self.clone();
        }
        let template = self
            .template
            .iter()
            .filter(|(field, _)| !hidden.contains(*field) || schema.is_primary_key(field))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            table: self.table.clone(),
            template,
        }
    }

    /// Wire form: `{ table: [template] }`.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            self.table.clone(),
            Value::Array(vec![Value::Object(self.template.clone())]),
        );
        Value::Object(map)
    }
}

/// One option clause sent alongside a query.
///
/// Serializes externally tagged: `{"set":true}`, `{"limit":N}`,
/// `{"order_by":"field"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClause {
    Set(bool),
    Limit(u32),
    OrderBy(String),
}

/// Ordered option clauses. Order matters: the first `order_by` is the
/// primary sort key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryOptions(Vec<QueryClause>);

impl QueryOptions {
    /// `[{limit}]` followed by one `{order_by}` per sort field, in order.
    pub fn subscription(limit: Option<u32>, sort_fields: &[String]) -> Self {
        let mut clauses = Vec::with_capacity(1 + sort_fields.len());
        clauses.push(QueryClause::Limit(limit.unwrap_or(DEFAULT_LIMIT)));
        clauses.extend(sort_fields.iter().cloned().map(QueryClause::OrderBy));
        Self(clauses)
    }

    /// `[{set: true}]`, used for writes.
    pub fn write() -> Self {
        Self(vec![QueryClause::Set(true)])
    }

    pub fn clauses(&self) -> &[QueryClause] {
        &self.0
    }

    pub fn limit(&self) -> Option<u32> {
        self.0.iter().find_map(|c| match c {
            QueryClause::Limit(n) => Some(*n),
            _ => None,
        })
    }

    pub fn order_by(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|c| match c {
            QueryClause::OrderBy(f) => Some(f.as_str()),
            _ => None,
        })
    }
}
