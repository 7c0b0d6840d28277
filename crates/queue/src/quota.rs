//! Per-source admission control.
//!
//! Counters live in the store under `{queue}:source_count:{source}` and
//! approximate how many live records each source owns. The check reads the
//! counter and the caller writes afterwards, with no lock in between, so
//! concurrent producers of one source can overshoot the limit by up to the
//! number of producers. This is a soft bound; do not rely on it as a cap.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedstash_core::QuotaSpec;

use crate::error::StoreError;
use crate::store::{CounterOp, QueueStore};

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject { count: u64, limit: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn QueueStore>,
    spec: QuotaSpec,
    max_keep: u64,
    key_prefix: String,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn QueueStore>, spec: QuotaSpec, max_keep: u64) -> Self {
        let key_prefix = format!("{}:source_count:", store.name());
        Self {
            store,
            spec,
            max_keep,
            key_prefix,
        }
    }

    pub fn spec(&self) -> &QuotaSpec {
        &self.spec
    }

    pub fn max_keep(&self) -> u64 {
        self.max_keep
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn counter_key(&self, source: &str) -> String {
        format!("{}{}", self.key_prefix, source)
    }

    /// Inverse of [`counter_key`](Self::counter_key).
    pub fn source_of_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.key_prefix.as_str())
    }

    /// `floor(max_keep * fraction)`, or `None` for an unlimited source.
    pub fn limit(&self, source: &str) -> Option<u64> {
        self.spec.limit(source, self.max_keep)
    }

    /// Admit or reject one more record for `source`.
    pub async fn check(&self, source: &str) -> Result<Admission, StoreError> {
        let Some(limit) = self.limit(source) else {
            return Ok(Admission::Admit);
        };
        let count = self.current(source).await?;
        Ok(Self::decide(count, limit))
    }

    /// Current counter value, clamped at zero.
    pub async fn current(&self, source: &str) -> Result<u64, StoreError> {
        let raw = self.store.get_counter(&self.counter_key(source)).await?;
        Ok(raw.max(0) as u64)
    }

    pub(crate) fn decide(count: u64, limit: u64) -> Admission {
        if count >= limit {
            Admission::Reject { count, limit }
        } else {
            Admission::Admit
        }
    }

    /// Count one written record.
    pub async fn record(&self, source: &str) -> Result<i64, StoreError> {
        self.store.incr_counter(&self.counter_key(source), 1).await
    }

    /// Count a bulk write: one pipelined increment per source.
    pub async fn record_many(&self, admitted: &BTreeMap<String, u64>) -> Result<(), StoreError> {
        let ops: Vec<CounterOp> = admitted
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(source, n)| CounterOp::Incr {
                key: self.counter_key(source),
                delta: *n as i64,
            })
            .collect();
        self.store.apply_counters(&ops).await
    }

    /// Every counter currently present in the store, keyed by source.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let keys = self.store.counter_keys(&self.key_prefix).await?;
        let mut counts = BTreeMap::new();
        for key in keys {
            if let Some(source) = self.source_of_key(&key) {
                counts.insert(source.to_string(), self.store.get_counter(&key).await?);
            }
        }
        Ok(counts)
    }
}
