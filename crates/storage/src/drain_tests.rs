use super::*;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use feedstash_core::QuotaSpec;
use feedstash_queue::{CounterOp, MemoryQueueStore, MemoryUsage, StoreError};
use serde_json::json;

use crate::archive::{read_archive, ArchiveEncoder};
use crate::error::ArchiveError;

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("feedstash-{tag}-{}", uuid::Uuid::new_v4()))
}

fn drain_for(store: Arc<dyn QueueStore>, dir: &Path, max_keep: u64) -> ArchiveDrain {
    let quota = QuotaTracker::new(store.clone(), QuotaSpec::new(), max_keep);
    let reconciler = Reconciler::new(store.clone(), quota);
    let writer = ArchiveWriter::new(dir, ArchiveFormat::Json);
    ArchiveDrain::new(store, writer, reconciler, max_keep).with_batch_size(128)
}

/// Push `n` records, oldest first; record `i` carries `seq = i`.
async fn fill(store: &dyn QueueStore, n: u64) {
    let sources = ["reddit", "hn", "news"];
    for i in 0..n {
        let record = Record::with_source(sources[(i % 3) as usize]).with("seq", i);
        store.push_front(record.to_json().unwrap()).await.unwrap();
    }
}

fn seqs(records: &[Record]) -> Vec<u64> {
    records
        .iter()
        .map(|r| r.get("seq").and_then(|v| v.as_u64()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_drain_exports_oldest_excess() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 1500).await;
    let dir = temp_dir("drain");
    let drain = drain_for(store.clone(), &dir, 1000);

    let stats = drain.drain().await.unwrap();

    assert_eq!(stats.queue_length_before, 1500);
    assert_eq!(stats.exported, 500);
    assert_eq!(stats.errored, 0);
    assert_eq!(stats.queue_length_after, 1000);

    let contents = read_archive(stats.archive_path().unwrap()).unwrap();
    assert_eq!(contents.count, 500);
    let expected: Vec<u64> = (0..500).rev().collect();
    assert_eq!(seqs(&contents.records), expected);

    let remaining: Vec<Record> = store
        .entries()
        .iter()
        .map(|e| Record::from_json(e).unwrap())
        .collect();
    assert_eq!(seqs(&remaining), (500..1500).rev().collect::<Vec<u64>>());

    let reconciliation = stats.reconciliation.unwrap();
    assert_eq!(reconciliation.total(), 1000);
    let counter_sum: i64 = store.counters().values().sum();
    assert_eq!(counter_sum, 1000);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_drain_within_limit_is_noop() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 1000).await;
    let before = store.entries();
    let dir = temp_dir("drain-noop");
    let drain = drain_for(store.clone(), &dir, 1000);

    let stats = drain.drain().await.unwrap();

    assert_eq!(stats.exported, 0);
    assert!(stats.archive.is_none());
    assert_eq!(stats.queue_length_after, 1000);
    assert_eq!(store.entries(), before);
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_export_failure_leaves_queue_untouched() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 20).await;
    let before = store.entries();

    let root = temp_dir("drain-blocked");
    std::fs::create_dir_all(&root).unwrap();
    let blocker = root.join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let drain = drain_for(store.clone(), &blocker.join("exports"), 10);

    let result = drain.drain().await;

    assert!(matches!(result, Err(DrainError::Export(_))));
    assert_eq!(store.entries(), before);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_trim_failure_keeps_queue_and_archive() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 20).await;
    store.set_fail_writes(true);
    let dir = temp_dir("drain-trimfail");
    let drain = drain_for(store.clone(), &dir, 10);

    let result = drain.drain().await;

    assert!(matches!(result, Err(DrainError::Store(_))));
    assert_eq!(store.entries().len(), 20);
    assert_eq!(crate::archive::list_archives(&dir).unwrap().len(), 1);
    std::fs::remove_dir_all(&dir).ok();
}

struct BrokenEncoder;

impl ArchiveEncoder for BrokenEncoder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Parquet
    }

    fn encode(&self, _batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError> {
        Err(ArchiveError::Encode("simulated".into()))
    }
}

#[tokio::test]
async fn test_encoder_failure_falls_back_and_still_drains() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 30).await;
    let dir = temp_dir("drain-fallback");
    let quota = QuotaTracker::new(store.clone(), QuotaSpec::new(), 10);
    let drain = ArchiveDrain::new(
        store.clone(),
        ArchiveWriter::with_encoder(&dir, Box::new(BrokenEncoder)),
        Reconciler::new(store.clone(), quota),
        10,
    );

    let stats = drain.drain().await.unwrap();

    assert!(stats.fallback());
    assert_eq!(stats.format(), Some(ArchiveFormat::Json));
    assert_eq!(stats.exported, 20);
    assert_eq!(read_archive(stats.archive_path().unwrap()).unwrap().count, 20);
    assert_eq!(store.entries().len(), 10);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_malformed_tail_entries_counted_and_trimmed() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    store.push_front("{oops".to_string()).await.unwrap();
    fill(store.as_ref(), 5).await;
    let dir = temp_dir("drain-malformed");
    let drain = drain_for(store.clone(), &dir, 3);

    let stats = drain.drain().await.unwrap();

    assert_eq!(stats.errored, 1);
    assert_eq!(stats.exported, 2);
    assert_eq!(stats.queue_length_after, 3);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_overlapping_drain_is_refused() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    let dir = temp_dir("drain-overlap");
    let drain = drain_for(store, &dir, 10);

    let _held = drain.running.try_lock().unwrap();
    assert!(matches!(drain.drain().await, Err(DrainError::AlreadyRunning)));
}

/// Records which thread encoded the batch, then writes plain JSON.
struct ThreadRecordingEncoder {
    seen: Arc<std::sync::Mutex<Option<std::thread::ThreadId>>>,
}

impl ArchiveEncoder for ThreadRecordingEncoder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Json
    }

    fn encode(&self, batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError> {
        *self.seen.lock().unwrap() = Some(std::thread::current().id());
        crate::archive::JsonEncoder::plain().encode(batch)
    }
}

#[tokio::test]
async fn test_archive_written_off_the_runtime_thread() {
    let store = Arc::new(MemoryQueueStore::new("q"));
    fill(store.as_ref(), 15).await;
    let dir = temp_dir("drain-blocking");
    let seen = Arc::new(std::sync::Mutex::new(None));

    let quota = QuotaTracker::new(store.clone(), QuotaSpec::new(), 10);
    let reconciler = Reconciler::new(store.clone(), quota);
    let writer = ArchiveWriter::with_encoder(
        &dir,
        Box::new(ThreadRecordingEncoder { seen: seen.clone() }),
    );
    let drain = ArchiveDrain::new(store.clone(), writer, reconciler, 10);

    let stats = drain.drain().await.unwrap();
    assert_eq!(stats.exported, 5);
    assert_eq!(store.len().await.unwrap(), 10);

    // current-thread runtime: the test body runs on the runtime thread
    let encoded_on = seen.lock().unwrap().expect("encoder ran");
    assert_ne!(encoded_on, std::thread::current().id());

    std::fs::remove_dir_all(&dir).ok();
}

/// Pushes fresh records at the head the first time the drain reads.
struct PushDuringRead {
    inner: MemoryQueueStore,
    pushed: AtomicBool,
}

#[async_trait]
impl QueueStore for PushDuringRead {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn push_front(&self, entry: String) -> Result<u64, StoreError> {
        self.inner.push_front(entry).await
    }

    async fn push_front_many(&self, entries: Vec<String>) -> Result<u64, StoreError> {
        self.inner.push_front_many(entries).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.inner.len().await
    }

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        if !self.pushed.swap(true, Ordering::SeqCst) {
            for i in 0..7 {
                let record = Record::with_source("late").with("late", i);
                self.inner.push_front(record.to_json().unwrap()).await?;
            }
        }
        self.inner.range(start, stop).await
    }

    async fn trim(&self, start: i64, stop: i64) -> Result<(), StoreError> {
        self.inner.trim(start, stop).await
    }

    async fn incr_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.incr_counter(key, delta).await
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.get_counter(key).await
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set_counter(key, value).await
    }

    async fn apply_counters(&self, ops: &[CounterOp]) -> Result<(), StoreError> {
        self.inner.apply_counters(ops).await
    }

    async fn counter_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.counter_keys(prefix).await
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
        self.inner.memory_usage().await
    }
}

#[tokio::test]
async fn test_concurrent_head_pushes_survive_drain() {
    let store = Arc::new(PushDuringRead {
        inner: MemoryQueueStore::new("q"),
        pushed: AtomicBool::new(false),
    });
    fill(&store.inner, 30).await;
    let dir = temp_dir("drain-concurrent");
    let drain = drain_for(store.clone(), &dir, 20);

    let stats = drain.drain().await.unwrap();

    assert_eq!(stats.exported, 10);
    let archived = read_archive(stats.archive_path().unwrap()).unwrap();
    assert_eq!(seqs(&archived.records), (0..10).rev().collect::<Vec<u64>>());

    let entries = store.inner.entries();
    assert_eq!(entries.len(), 27);
    let newest = Record::from_json(&entries[0]).unwrap();
    assert_eq!(newest.get("late"), Some(&json!(6)));
    std::fs::remove_dir_all(&dir).ok();
}
