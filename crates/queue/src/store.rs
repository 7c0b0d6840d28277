//! Queue store trait and shared types.
//!
//! The queue is an ordered list with the newest entry at index 0. Indices
//! follow Redis list semantics: negative values count from the tail, and
//! out-of-range bounds are clamped.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One counter mutation inside a pipelined batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOp {
    Incr { key: String, delta: i64 },
    Set { key: String, value: i64 },
}

/// Memory reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub peak_bytes: u64,
}

impl MemoryUsage {
    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / 1024.0 / 1024.0
    }

    pub fn peak_mb(&self) -> f64 {
        self.peak_bytes as f64 / 1024.0 / 1024.0
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}MB (peak {:.2}MB)", self.used_mb(), self.peak_mb())
    }
}

/// Operation set over the shared queue and its counters.
///
/// Every call is bounded by the backend's timeout and fails with
/// [`StoreError::Unavailable`] or [`StoreError::Timeout`] instead of hanging.
/// Writers coordinate only through these primitives; there is no external
/// lock.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Name of the queue (also the prefix for counter keys).
    fn name(&self) -> &str;

    /// Insert one serialized record at the head. Returns the new length.
    async fn push_front(&self, entry: String) -> Result<u64, StoreError>;

    /// Insert many records at the head in a single round trip. The last
    /// entry ends up at index 0. All or nothing.
    async fn push_front_many(&self, entries: Vec<String>) -> Result<u64, StoreError>;

    async fn len(&self) -> Result<u64, StoreError>;

    /// Entries in the inclusive index range `[start, stop]`.
    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Keep only the inclusive index range `[start, stop]`.
    async fn trim(&self, start: i64, stop: i64) -> Result<(), StoreError>;

    async fn incr_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Current value, 0 when the key does not exist.
    async fn get_counter(&self, key: &str) -> Result<i64, StoreError>;

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Apply increments and sets in one pipelined round trip.
    async fn apply_counters(&self, ops: &[CounterOp]) -> Result<(), StoreError>;

    /// All counter keys starting with `prefix`.
    async fn counter_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_mb() {
        let usage = MemoryUsage {
            used_bytes: 3 * 1024 * 1024,
            peak_bytes: 5 * 1024 * 1024,
        };
        assert!((usage.used_mb() - 3.0).abs() < 1e-9);
        assert!((usage.peak_mb() - 5.0).abs() < 1e-9);
        assert_eq!(usage.to_string(), "3.00MB (peak 5.00MB)");
    }
}
