//! Core types for the document store.

use crate::error::{Result, StoreError};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Primary key field present on every stored document.
pub const ID_FIELD: &str = "id";

/// Creation timestamp field filled in on insert when absent.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Generate a fresh document identifier (random UUID v4, hyphenated).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current instant as an ISO-8601 UTC string, e.g. `2024-05-01T12:30:45.123Z`.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A schema-less record: a JSON object keyed by field name.
///
/// The `id` field is the primary key within a collection. Every other field
/// is opaque to the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StoreError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The primary key, if present and textual.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolve a field key, following one level of nesting for
    /// `relation.field` keys.
    ///
    /// Returns `None` when the relation is absent or not an object.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        match key.split_once('.') {
            Some((relation, field)) => self.0.get(relation)?.as_object()?.get(field),
            None => self.0.get(key),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Shallow merge: every field in `patch` overwrites the field of the same
    /// name here; fields absent from `patch` are kept.
    pub fn merge(&mut self, patch: &Document) {
        for (field, value) in &patch.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self> {
        Document::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Kind of change carried by a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "INSERT",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(EventType::Insert),
            "UPDATE" => Ok(EventType::Update),
            "DELETE" => Ok(EventType::Delete),
            other => Err(StoreError::InvalidDocument(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub collection_count: u64,
    pub document_count: u64,
    /// Bytes across all collection logs.
    pub log_size_bytes: u64,
}
