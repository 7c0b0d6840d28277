//! Slim-mode compaction: reduce a record to a fixed field allow-list.

use serde_json::{Map, Value};

use feedstash_core::Record;

/// Fields kept in slim mode.
pub const SLIM_FIELDS: &[&str] = &[
    "title",
    "url",
    "published",
    "source",
    "feed_category",
    "language",
    "summary",
    "timestamp",
];

/// Producer-side crawl time, used when `timestamp` is absent.
const CRAWL_TIMESTAMP_FIELD: &str = "crawl_timestamp";

/// Full-text field a missing `summary` is cut from.
const TEXT_FIELD: &str = "text";

/// Reduces records to [`SLIM_FIELDS`] before they are stored.
#[derive(Debug, Clone)]
pub struct Slimmer {
    summary_chars: usize,
}

impl Slimmer {
    pub fn new(summary_chars: usize) -> Self {
        Self { summary_chars }
    }

    pub fn summary_chars(&self) -> usize {
        self.summary_chars
    }

    /// Keep only allow-listed fields.
    ///
    /// - `timestamp` falls back to `crawl_timestamp`.
    /// - `summary` falls back to the first `summary_chars` characters of a
    ///   string `text` field.
    pub fn apply(&self, record: Record) -> Record {
        let mut fields = record.into_fields();
        let mut slim = Map::new();

        for name in SLIM_FIELDS {
            if let Some(v) = fields.remove(*name) {
                slim.insert((*name).to_string(), v);
            }
        }

        if !slim.contains_key("timestamp") {
            if let Some(ts) = fields.remove(CRAWL_TIMESTAMP_FIELD) {
                slim.insert("timestamp".to_string(), ts);
            }
        }

        if !slim.contains_key("summary") {
            if let Some(Value::String(text)) = fields.get(TEXT_FIELD) {
                let summary: String = text.chars().take(self.summary_chars).collect();
                slim.insert("summary".to_string(), Value::String(summary));
            }
        }

        Record::new(slim)
    }
}
