//! The single write path for producers.
//!
//! `ingest` runs, in order: optional slim-mode compaction, quota check,
//! serialization, head push, counter increment, and a queue-depth check
//! that only logs. Failures on this path never propagate to producers;
//! they see `false` and the failure is logged and counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use feedstash_core::{Config, Record};

use crate::error::IngestError;
use crate::quota::{Admission, QuotaTracker};
use crate::slim::Slimmer;
use crate::store::QueueStore;

/// What happened to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Written {
        queue_len: u64,
        /// Queue is past the retention target; a drain is due.
        should_archive: bool,
    },
    Rejected {
        count: u64,
        limit: u64,
    },
}

/// Result of a bulk ingest.
///
/// A failed bulk write reports `written == 0` with `write_failed` set, even
/// if the store applied part of it. Partial success is not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub submitted: usize,
    pub written: usize,
    pub rejected: usize,
    pub errored: usize,
    pub write_failed: bool,
    pub queue_len: Option<u64>,
}

/// Running totals since the gateway was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub written: u64,
    pub rejected: u64,
    pub errored: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    rejected: AtomicU64,
    errored: AtomicU64,
}

pub struct IngestGateway {
    store: Arc<dyn QueueStore>,
    quota: QuotaTracker,
    slimmer: Option<Slimmer>,
    retention_target: u64,
    counters: Counters,
}

impl IngestGateway {
    pub fn new(store: Arc<dyn QueueStore>, quota: QuotaTracker) -> Self {
        let retention_target = quota.max_keep();
        Self {
            store,
            quota,
            slimmer: None,
            retention_target,
            counters: Counters::default(),
        }
    }

    /// Wire a gateway from the loaded config.
    pub fn from_config(store: Arc<dyn QueueStore>, config: &Config) -> Self {
        let quota = QuotaTracker::new(
            store.clone(),
            config.quotas.clone(),
            config.retention.max_keep,
        );
        let gateway = Self::new(store, quota);
        if config.retention.slim_mode {
            info!(summary_chars = config.retention.summary_chars, "Slim mode enabled");
            gateway.with_slim_mode(Slimmer::new(config.retention.summary_chars))
        } else {
            gateway
        }
    }

    pub fn with_slim_mode(mut self, slimmer: Slimmer) -> Self {
        self.slimmer = Some(slimmer);
        self
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            written: self.counters.written.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            errored: self.counters.errored.load(Ordering::Relaxed),
        }
    }

    /// Producer entry point. `true` when the record was written.
    pub async fn ingest(&self, record: Record) -> bool {
        match self.try_ingest(record).await {
            Ok(IngestOutcome::Written { .. }) => true,
            Ok(IngestOutcome::Rejected { .. }) => false,
            Err(e) => {
                error!(queue = %self.store.name(), error = %e, "Failed to ingest record, dropping it");
                false
            }
        }
    }

    /// Accepts raw JSON from producers; non-objects are counted as errors.
    pub async fn ingest_value(&self, value: Value) -> bool {
        match Record::from_value(value) {
            Ok(record) => self.ingest(record).await,
            Err(e) => {
                self.counters.errored.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping malformed record");
                false
            }
        }
    }

    /// Same as [`ingest`](Self::ingest) but surfaces the outcome and error.
    pub async fn try_ingest(&self, record: Record) -> Result<IngestOutcome, IngestError> {
        let result = self.ingest_one(record).await;
        match &result {
            Ok(IngestOutcome::Written { .. }) => self.counters.written.fetch_add(1, Ordering::Relaxed),
            Ok(IngestOutcome::Rejected { .. }) => self.counters.rejected.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.errored.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn ingest_one(&self, record: Record) -> Result<IngestOutcome, IngestError> {
        let record = self.compact(record);
        let source = record.source().to_string();

        if let Admission::Reject { count, limit } = self.quota.check(&source).await? {
            warn!(source = %source, count, limit, "Source over quota, dropping record (soft limit)");
            return Ok(IngestOutcome::Rejected { count, limit });
        }

        let entry = record.to_json()?;
        let queue_len = self.store.push_front(entry).await?;

        // The record is stored; a lost increment is corrected by the next reconciliation.
        if let Err(e) = self.quota.record(&source).await {
            warn!(source = %source, error = %e, "Failed to bump source counter");
        }

        let should_archive = self.check_depth(queue_len);
        debug!(source = %source, queue_len, "Record pushed");
        Ok(IngestOutcome::Written { queue_len, should_archive })
    }

    /// Bulk ingest: quota checks and serialization first, then one write for
    /// every admitted record and one pipelined counter update.
    pub async fn ingest_batch(&self, records: Vec<Record>) -> BatchReport {
        let mut report = BatchReport {
            submitted: records.len(),
            ..BatchReport::default()
        };

        let mut entries = Vec::with_capacity(records.len());
        let mut admitted: BTreeMap<String, u64> = BTreeMap::new();
        // Counter value per limited source, read once per batch.
        let mut seen: HashMap<String, u64> = HashMap::new();

        for record in records {
            let record = self.compact(record);
            let source = record.source().to_string();

            if let Some(limit) = self.quota.limit(&source) {
                let count = match seen.get(&source) {
                    Some(c) => *c,
                    None => match self.quota.current(&source).await {
                        Ok(c) => {
                            seen.insert(source.clone(), c);
                            c
                        }
                        Err(e) => {
                            warn!(source = %source, error = %e, "Quota check failed, skipping record");
                            report.errored += 1;
                            continue;
                        }
                    },
                };
                let pending = admitted.get(&source).copied().unwrap_or(0);
                if let Admission::Reject { .. } = QuotaTracker::decide(count + pending, limit) {
                    report.rejected += 1;
                    continue;
                }
            }

            match record.to_json() {
                Ok(entry) => {
                    entries.push(entry);
                    *admitted.entry(source).or_insert(0) += 1;
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "Failed to serialize record, skipping");
                    report.errored += 1;
                }
            }
        }

        if report.rejected > 0 {
            warn!(rejected = report.rejected, "Batch records dropped by source quota (soft limit)");
        }

        if !entries.is_empty() {
            let count = entries.len();
            match self.store.push_front_many(entries).await {
                Ok(queue_len) => {
                    report.written = count;
                    report.queue_len = Some(queue_len);
                    if let Err(e) = self.quota.record_many(&admitted).await {
                        warn!(error = %e, "Failed to bump source counters for batch");
                    }
                    self.check_depth(queue_len);
                    info!(written = count, queue_len, "Batch pushed");
                }
                Err(e) => {
                    report.write_failed = true;
                    report.errored += count;
                    error!(
                        queue = %self.store.name(),
                        records = count,
                        error = %e,
                        "Batch write failed, 0 records stored"
                    );
                }
            }
        }

        self.counters.written.fetch_add(report.written as u64, Ordering::Relaxed);
        self.counters.rejected.fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.counters.errored.fetch_add(report.errored as u64, Ordering::Relaxed);
        report
    }

    /// Newest `count` records, head first. Unparseable entries are skipped.
    pub async fn peek(&self, count: usize) -> Result<Vec<Record>, IngestError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.range(0, count as i64 - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match Record::from_json(entry) {
                Ok(r) => Some(r),
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable queue entry");
                    None
                }
            })
            .collect())
    }

    fn compact(&self, record: Record) -> Record {
        match &self.slimmer {
            Some(slimmer) => slimmer.apply(record),
            None => record,
        }
    }

    fn check_depth(&self, queue_len: u64) -> bool {
        if queue_len > self.retention_target {
            warn!(
                queue = %self.store.name(),
                queue_len,
                threshold = self.retention_target,
                "Queue length over retention target, archive recommended"
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
