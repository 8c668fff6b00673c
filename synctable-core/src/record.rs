//! Records and primary-key tuples.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A row as seen by the client: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Build a record from `(field, value)` pairs.
pub fn record<I, K>(fields: I) -> Record
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Merge `source` into `target` field by field.
///
/// Fields absent from `source` are kept. Returns true if any value in
/// `target` changed.
pub fn merge_record(target: &mut Record, source: &Record) -> bool {
    let mut changed = false;
    for (field, value) in source {
        match target.get_mut(field) {
            Some(existing) if existing == value => {}
            Some(existing) => {
                *existing = value.clone();
                changed = true;
            }
            None => {
                target.insert(field.clone(), value.clone());
                changed = true;
            }
        }
    }
    changed
}

/// The ordered primary-key values identifying a record.
///
/// Values are normalized by the table schema on extraction, so two tuples
/// compare equal exactly when every key field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<KeyPart>);

/// One normalized primary-key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    /// Non-integral numbers keep their textual form so the tuple stays hashable.
    Number(String),
    Text(String),
    Json(String),
}

impl PrimaryKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Stable string form of the tuple, suitable as a map key or log field.
    pub fn to_key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl KeyPart {
    /// Normalize a JSON value into a key component. `None` for null.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                {
                    Some(Self::Int(f as i64))
                } else {
                    Some(Self::Number(n.to_string()))
                }
            }
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Json(other.to_string())),
        }
    }
}
