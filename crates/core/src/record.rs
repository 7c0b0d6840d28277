//! The record model shared by producers, the queue and the archives.
//!
//! A [`Record`] is an opaque JSON object. The only field the pipeline
//! interprets is `source`, which drives quota accounting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StashError;

/// Field holding the producer tag.
pub const SOURCE_FIELD: &str = "source";

/// Accounting bucket for records that carry no usable `source`.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A single ingested record: an ordered mapping of field name to JSON value.
///
/// Records are immutable once written to the queue; an update is a new
/// record pushed at the head.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Start a record tagged with `source`.
    pub fn with_source(source: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(SOURCE_FIELD.to_string(), Value::String(source.into()));
        Self { fields }
    }

    /// Builder-style field insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Accept any JSON value that is an object.
    pub fn from_value(value: Value) -> Result<Self, StashError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(StashError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a serialized queue entry.
    pub fn from_json(raw: &str) -> Result<Self, StashError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> Result<String, StashError> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    /// The accounting source. Missing, non-string and empty tags map to
    /// [`UNKNOWN_SOURCE`].
    pub fn source(&self) -> &str {
        match self.fields.get(SOURCE_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            _ => UNKNOWN_SOURCE,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_defaults_to_unknown() {
        let rec = Record::new(Map::new()).with("title", "no tag");
        assert_eq!(rec.source(), UNKNOWN_SOURCE);

        let rec = Record::with_source("");
        assert_eq!(rec.source(), UNKNOWN_SOURCE);

        let rec = Record::new(Map::new()).with("source", 42);
        assert_eq!(rec.source(), UNKNOWN_SOURCE);
    }

    #[test]
    fn test_source_tag() {
        let rec = Record::with_source("reddit").with("title", "hello");
        assert_eq!(rec.source(), "reddit");
        assert_eq!(rec.get("title"), Some(&json!("hello")));
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        let err = Record::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, StashError::InvalidRecord(_)));
        assert!(err.to_string().contains("array"));

        assert!(Record::from_value(json!({"source": "rss"})).is_ok());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = Record::from_json("not json").unwrap_err();
        assert!(matches!(err, StashError::Serialize(_)));

        let err = Record::from_json("\"just a string\"").unwrap_err();
        assert!(matches!(err, StashError::InvalidRecord(_)));
    }

    #[test]
    fn test_json_preserves_nested_values() {
        let rec = Record::from_value(json!({
            "source": "newsapi",
            "tags": ["a", "b"],
            "meta": {"score": 1.5, "ok": true},
            "missing": null
        }))
        .unwrap();

        let raw = rec.to_json().unwrap();
        let back = Record::from_json(&raw).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn test_serde_transparent() {
        let rec = Record::with_source("rss").with("url", "http://example.com");
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value, json!({"source": "rss", "url": "http://example.com"}));
    }
}
