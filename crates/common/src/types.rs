use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Instant at which a snapshot or diff was taken.
pub type Timestamp = DateTime<Utc>;

/// The smallest instant strictly after `ts`.
///
/// Lets an inclusive `<= ts` bound be expressed through a strict `< bound` query.
pub fn successor(ts: Timestamp) -> Timestamp {
    ts.checked_add_signed(TimeDelta::nanoseconds(1)).unwrap_or(ts)
}

/// The greatest instant strictly before `ts`.
pub fn predecessor(ts: Timestamp) -> Timestamp {
    ts.checked_sub_signed(TimeDelta::nanoseconds(1)).unwrap_or(ts)
}

/// Storage identifier assigned to a snapshot or diff when it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identifier of a logical object across all its snapshots and diffs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjId(String);

impl ObjId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ObjId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ObjId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provenance of a change: the acting user and the channel it came through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Creator {
    pub user: String,
    pub source: String,
}

impl Creator {
    pub fn new(user: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            source: source.into(),
        }
    }
}

/// Short name of a JSON value's kind, used in error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_id_uniqueness() {
        let a = RecordId::new();
        let b = RecordId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn successor_is_strictly_later() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let next = successor(t);
        assert!(next > t);
        assert_eq!((next - t).num_nanoseconds(), Some(1));
        assert_eq!(predecessor(next), t);
    }

    #[test]
    fn obj_id_serializes_as_plain_string() {
        let id = ObjId::from("order-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"order-7\"");
        assert_eq!(id.to_string(), "order-7");
    }

    #[test]
    fn value_kind_names() {
        assert_eq!(value_kind(&serde_json::json!(null)), "null");
        assert_eq!(value_kind(&serde_json::json!([1])), "array");
        assert_eq!(value_kind(&serde_json::json!({"a": 1})), "object");
    }
}
