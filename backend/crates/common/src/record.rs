use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source field carrying the soft-delete flag.
pub const IS_DELETED_FIELD: &str = "IsDeleted";

/// Source field carrying the last-modified timestamp.
pub const LAST_MODIFIED_FIELD: &str = "LastModifiedDate";

/// One item returned by the source API.
///
/// Relationship fields arrive as nested objects (`{"Account": {"Name": "Acme"}}`)
/// and are addressed with dotted paths (`Account.Name`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(pub Map<String, Value>);

impl SourceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Resolve a dotted field path by successive lookups into nested objects.
    ///
    /// Yields `Value::Null` when any segment is missing or an intermediate value
    /// is not an object.
    pub fn resolve(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return Value::Null;
        };

        let mut current = match self.0.get(first) {
            Some(v) => v,
            None => return Value::Null,
        };

        for segment in segments {
            current = match current.as_object().and_then(|obj| obj.get(segment)) {
                Some(v) => v,
                None => return Value::Null,
            };
        }

        current.clone()
    }

    /// `true` when the source flagged this record as soft-deleted.
    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(IS_DELETED_FIELD), Some(Value::Bool(true)))
    }
}

impl From<Value> for SourceRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}
