//! Changefeed messages and change events.

use crate::error::TransportError;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque changefeed handle issued by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated token attached to a save. A remote that echoes it on
/// the resulting change lets the client recognize its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteToken(Uuid);

impl WriteToken {
    /// Generate a fresh, time-ordered token.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for WriteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single row change from the changefeed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Insert or update; carries the new value.
    Upsert(Record),
    /// Delete; carries the old value.
    Delete(Record),
}

impl ChangeEvent {
    /// Classify an `{old_val, new_val}` pair. `new_val` wins when both are
    /// present; `None` when neither is.
    pub fn from_values(old_val: Option<Record>, new_val: Option<Record>) -> Option<Self> {
        match (old_val, new_val) {
            (_, Some(new_val)) => Some(Self::Upsert(new_val)),
            (Some(old_val), None) => Some(Self::Delete(old_val)),
            (None, None) => None,
        }
    }

    /// The record the event is keyed on.
    pub fn record(&self) -> &Record {
        match self {
            Self::Upsert(r) | Self::Delete(r) => r,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }
}

/// One message delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMessage {
    /// First message: full result plus the changefeed handle (absent when
    /// no changefeed was requested).
    Initial {
        id: Option<SubscriptionId>,
        table: String,
        records: Vec<Record>,
    },
    /// Subsequent change, optionally tagged with the write token of the
    /// save that caused it.
    Change {
        event: ChangeEvent,
        origin: Option<WriteToken>,
    },
}

impl QueryMessage {
    /// Decode a raw response.
    ///
    /// Responses with an `action` field are changes; anything else is the
    /// initial result. Returns `Ok(None)` for a change carrying neither
    /// `old_val` nor `new_val`.
    pub fn from_json(raw: &Value) -> Result<Option<Self>, TransportError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| TransportError::MalformedResponse {
                reason: "response is not an object".to_string(),
            })?;

        if obj.contains_key("action") {
            let old_val = optional_record(obj.get("old_val"), "old_val")?;
            let new_val = optional_record(obj.get("new_val"), "new_val")?;
            let origin = match obj.get("write_token") {
                None | Some(Value::Null) => None,
                Some(v) => Some(serde_json::from_value(v.clone()).map_err(|e| {
                    TransportError::MalformedResponse {
                        reason: format!("write_token: {}", e),
                    }
                })?),
            };
            return Ok(ChangeEvent::from_values(old_val, new_val)
                .map(|event| Self::Change { event, origin }));
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(SubscriptionId::new(s.clone())),
            Some(other) => Some(SubscriptionId::new(other.to_string())),
        };
        let query = obj
            .get("query")
            .and_then(Value::as_object)
            .ok_or_else(|| TransportError::MalformedResponse {
                reason: "initial response has no query object".to_string(),
            })?;
        let (table, rows) = query
            .iter()
            .next()
            .ok_or_else(|| TransportError::MalformedResponse {
                reason: "initial response names no table".to_string(),
            })?;
        let records = match rows {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .cloned()
                        .ok_or_else(|| TransportError::MalformedResponse {
                            reason: format!("{} row is not an object", table),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Value::Null => Vec::new(),
            Value::Object(single) => vec![single.clone()],
            _ => {
                return Err(TransportError::MalformedResponse {
                    reason: format!("{} rows are not an array", table),
                })
            }
        };

        Ok(Some(Self::Initial {
            id,
            table: table.clone(),
            records,
        }))
    }
}

fn optional_record(value: Option<&Value>, field: &str) -> Result<Option<Record>, TransportError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(TransportError::MalformedResponse {
            reason: format!("{} is not an object", field),
        }),
    }
}
