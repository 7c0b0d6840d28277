//! In-process queue store with Redis list semantics.
//!
//! Backs tests and single-process deployments. Fault switches let callers
//! simulate an unreachable store or failing writes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{CounterOp, MemoryUsage, QueueStore};

#[derive(Default)]
struct Inner {
    list: VecDeque<String>,
    counters: HashMap<String, i64>,
    peak_bytes: u64,
}

impl Inner {
    fn used_bytes(&self) -> u64 {
        let list: usize = self.list.iter().map(String::len).sum();
        let counters: usize = self.counters.keys().map(|k| k.len() + 8).sum();
        (list + counters) as u64
    }

    fn track_peak(&mut self) {
        self.peak_bytes = self.peak_bytes.max(self.used_bytes());
    }
}

pub struct MemoryQueueStore {
    name: String,
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            unavailable: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Every operation fails with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// List writes (push, trim) fail while set; reads and counters still work.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the list, head first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().list.iter().cloned().collect()
    }

    /// Snapshot of all counters.
    pub fn counters(&self) -> HashMap<String, i64> {
        self.lock().counters.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("memory store '{}' is offline", self.name)));
        }
        Ok(())
    }

    fn check_write(&self, op: &str) -> Result<(), StoreError> {
        self.check()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{op} rejected by memory store '{}'", self.name)));
        }
        Ok(())
    }
}

/// Resolve a Redis-style inclusive range against a list of `len` entries.
/// Returns `None` when the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push_front(&self, entry: String) -> Result<u64, StoreError> {
        self.check_write("LPUSH")?;
        let mut inner = self.lock();
        inner.list.push_front(entry);
        inner.track_peak();
        Ok(inner.list.len() as u64)
    }

    async fn push_front_many(&self, entries: Vec<String>) -> Result<u64, StoreError> {
        self.check_write("LPUSH")?;
        let mut inner = self.lock();
        for entry in entries {
            inner.list.push_front(entry);
        }
        inner.track_peak();
        Ok(inner.list.len() as u64)
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.lock().list.len() as u64)
    }

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let inner = self.lock();
        Ok(match resolve_range(inner.list.len(), start, stop) {
            Some((s, e)) => inner.list.range(s..=e).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn trim(&self, start: i64, stop: i64) -> Result<(), StoreError> {
        self.check_write("LTRIM")?;
        let mut inner = self.lock();
        match resolve_range(inner.list.len(), start, stop) {
            Some((s, e)) => {
                inner.list.truncate(e + 1);
                inner.list.drain(..s);
            }
            None => inner.list.clear(),
        }
        Ok(())
    }

    async fn incr_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.check()?;
        let mut inner = self.lock();
        let value = inner.counters.entry(key.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        self.check()?;
        Ok(self.lock().counters.get(key).copied().unwrap_or(0))
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.check()?;
        self.lock().counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn apply_counters(&self, ops: &[CounterOp]) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.lock();
        for op in ops {
            match op {
                CounterOp::Incr { key, delta } => {
                    *inner.counters.entry(key.clone()).or_insert(0) += delta;
                }
                CounterOp::Set { key, value } => {
                    inner.counters.insert(key.clone(), *value);
                }
            }
        }
        Ok(())
    }

    async fn counter_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let mut keys: Vec<String> = self
            .lock()
            .counters
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
        self.check()?;
        let inner = self.lock();
        Ok(MemoryUsage {
            used_bytes: inner.used_bytes(),
            peak_bytes: inner.peak_bytes,
        })
    }
}
