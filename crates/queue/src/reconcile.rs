//! Rebuild source counters from what is actually in the queue.
//!
//! Counters drift: trims remove records without decrementing, and a failed
//! increment after a successful push loses one count. Reconciliation scans
//! the live queue and overwrites every counter with the observed value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use feedstash_core::Record;

use crate::error::StoreError;
use crate::quota::QuotaTracker;
use crate::store::{CounterOp, QueueStore};

pub const DEFAULT_SCAN_BATCH: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Entries read from the queue.
    pub scanned: u64,
    /// Entries that did not parse as a record.
    pub malformed: u64,
    /// Observed count per source.
    pub counts: BTreeMap<String, u64>,
    /// Counters that existed but had no records, now set to zero.
    pub zeroed: Vec<String>,
}

impl Reconciliation {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

pub struct Reconciler {
    store: Arc<dyn QueueStore>,
    quota: QuotaTracker,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn QueueStore>, quota: QuotaTracker) -> Self {
        Self {
            store,
            quota,
            batch_size: DEFAULT_SCAN_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Scan up to `max_scan` entries from the head (all of them when `None`)
    /// and overwrite the counters.
    pub async fn rebuild(&self, max_scan: Option<u64>) -> Result<Reconciliation, StoreError> {
        let len = self.store.len().await?;
        let to_scan = max_scan.map_or(len, |max| len.min(max));
        if to_scan < len {
            warn!(
                queue_len = len,
                scanned = to_scan,
                "Queue larger than reconcile scan limit, counters cover the newest records only"
            );
        }

        let mut result = Reconciliation::default();
        let mut offset = 0u64;
        while offset < to_scan {
            let end = (offset + self.batch_size as u64).min(to_scan);
            let batch = self.store.range(offset as i64, end as i64 - 1).await?;
            if batch.is_empty() {
                break;
            }
            for entry in &batch {
                result.scanned += 1;
                match Record::from_json(entry) {
                    Ok(record) => *result.counts.entry(record.source().to_string()).or_insert(0) += 1,
                    Err(_) => result.malformed += 1,
                }
            }
            offset += batch.len() as u64;
        }

        let mut ops: Vec<CounterOp> = result
            .counts
            .iter()
            .map(|(source, n)| CounterOp::Set {
                key: self.quota.counter_key(source),
                value: *n as i64,
            })
            .collect();

        for key in self.store.counter_keys(self.quota.key_prefix()).await? {
            let Some(source) = self.quota.source_of_key(&key) else {
                continue;
            };
            if !result.counts.contains_key(source) {
                result.zeroed.push(source.to_string());
                ops.push(CounterOp::Set { key, value: 0 });
            }
        }

        self.store.apply_counters(&ops).await?;

        if result.malformed > 0 {
            warn!(malformed = result.malformed, "Skipped unparseable entries while reconciling");
        }
        debug!(zeroed = ?result.zeroed, "Stale counters reset");
        info!(
            scanned = result.scanned,
            sources = result.counts.len(),
            total = result.total(),
            "Source counters reconciled"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedstash_core::QuotaSpec;

    use crate::memory::MemoryQueueStore;

    fn reconciler(store: Arc<MemoryQueueStore>) -> Reconciler {
        let quota = QuotaTracker::new(store.clone(), QuotaSpec::new(), 100);
        Reconciler::new(store, quota).with_batch_size(3)
    }

    async fn push(store: &MemoryQueueStore, source: &str, n: usize) {
        for i in 0..n {
            let record = Record::with_source(source).with("n", i as u64);
            store.push_front(record.to_json().unwrap()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_drifted_counters() {
        let store = Arc::new(MemoryQueueStore::new("q"));
        push(&store, "reddit", 4).await;
        push(&store, "hn", 2).await;
        store.set_counter("q:source_count:reddit", 40).await.unwrap();
        store.set_counter("q:source_count:gone", 7).await.unwrap();

        let result = reconciler(store.clone()).rebuild(None).await.unwrap();

        assert_eq!(result.scanned, 6);
        assert_eq!(result.total(), 6);
        assert_eq!(result.zeroed, vec!["gone".to_string()]);
        let counters = store.counters();
        assert_eq!(counters.get("q:source_count:reddit"), Some(&4));
        assert_eq!(counters.get("q:source_count:hn"), Some(&2));
        assert_eq!(counters.get("q:source_count:gone"), Some(&0));
    }

    #[tokio::test]
    async fn test_rebuild_counts_malformed_and_unknown() {
        let store = Arc::new(MemoryQueueStore::new("q"));
        push(&store, "rss", 1).await;
        store.push_front("{broken".to_string()).await.unwrap();
        store.push_front(r#"{"title":"no source"}"#.to_string()).await.unwrap();

        let result = reconciler(store).rebuild(None).await.unwrap();
        assert_eq!(result.scanned, 3);
        assert_eq!(result.malformed, 1);
        assert_eq!(result.counts.get("unknown"), Some(&1));
        assert_eq!(result.counts.get("rss"), Some(&1));
    }

    #[tokio::test]
    async fn test_rebuild_respects_scan_limit() {
        let store = Arc::new(MemoryQueueStore::new("q"));
        push(&store, "old", 5).await;
        push(&store, "new", 5).await;

        let result = reconciler(store).rebuild(Some(7)).await.unwrap();
        assert_eq!(result.scanned, 7);
        assert_eq!(result.counts.get("new"), Some(&5));
        assert_eq!(result.counts.get("old"), Some(&2));
    }

    #[tokio::test]
    async fn test_rebuild_empty_queue_zeroes_everything() {
        let store = Arc::new(MemoryQueueStore::new("q"));
        store.set_counter("q:source_count:rss", 3).await.unwrap();

        let result = reconciler(store.clone()).rebuild(None).await.unwrap();
        assert_eq!(result.scanned, 0);
        assert!(result.counts.is_empty());
        assert_eq!(store.counters().get("q:source_count:rss"), Some(&0));
    }

    #[tokio::test]
    async fn test_rebuild_fails_when_store_unavailable() {
        let store = Arc::new(MemoryQueueStore::new("q"));
        store.set_unavailable(true);
        assert!(reconciler(store).rebuild(None).await.is_err());
    }
}
