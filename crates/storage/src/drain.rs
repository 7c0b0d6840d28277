//! Export the oldest excess records, then shrink the live queue.
//!
//! Steps: read length `L`; if `L <= max_keep` do nothing. Otherwise read the
//! oldest `L - max_keep` entries, write them to one archive file, trim them
//! off the queue and rebuild the source counters.
//!
//! Reads and the trim are anchored at the tail (`[-n, -1]` and
//! `[0, -(n + 1)]`), so records pushed at the head while the drain runs are
//! neither exported nor trimmed. Without concurrent pushes these are exactly
//! `[max_keep, L - 1]` and `[0, max_keep - 1]`.
//!
//! The trim is the commit point. It runs only after the archive file is
//! synced to disk, and every store call before it is read-only, so dropping
//! the future or failing before the trim leaves the queue untouched. The
//! archive is encoded and written on a blocking thread; if the future is
//! dropped while that runs, the file may still land and its records are
//! archived again by the next drain.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use feedstash_core::config::ArchiveFormat;
use feedstash_core::{Config, Record};
use feedstash_queue::{QueueStore, QuotaTracker, Reconciler, Reconciliation};

use crate::archive::{ArchiveBatch, ArchiveOutcome, ArchiveWriter};
use crate::error::{ArchiveError, DrainError};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub queue_length_before: u64,
    /// Records written to the archive.
    pub exported: u64,
    /// Entries trimmed without being archived because they did not parse.
    pub errored: u64,
    pub queue_length_after: u64,
    pub archive: Option<ArchiveOutcome>,
    /// `None` when the post-drain rebuild failed; counters drift until the next one.
    pub reconciliation: Option<Reconciliation>,
}

impl DrainStats {
    fn noop(queue_len: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            queue_length_before: queue_len,
            exported: 0,
            errored: 0,
            queue_length_after: queue_len,
            archive: None,
            reconciliation: None,
        }
    }

    pub fn archive_path(&self) -> Option<&PathBuf> {
        self.archive.as_ref().map(|a| &a.path)
    }

    pub fn format(&self) -> Option<ArchiveFormat> {
        self.archive.as_ref().map(|a| a.format)
    }

    pub fn fallback(&self) -> bool {
        self.archive.as_ref().is_some_and(|a| a.fallback)
    }
}

pub struct ArchiveDrain {
    store: Arc<dyn QueueStore>,
    writer: Arc<ArchiveWriter>,
    reconciler: Reconciler,
    max_keep: u64,
    batch_size: usize,
    reconcile_max_scan: Option<u64>,
    running: Mutex<()>,
}

impl ArchiveDrain {
    pub fn new(
        store: Arc<dyn QueueStore>,
        writer: ArchiveWriter,
        reconciler: Reconciler,
        max_keep: u64,
    ) -> Self {
        Self {
            store,
            writer: Arc::new(writer),
            reconciler,
            max_keep,
            batch_size: DEFAULT_BATCH_SIZE,
            reconcile_max_scan: Some(max_keep),
            running: Mutex::new(()),
        }
    }

    pub fn from_config(store: Arc<dyn QueueStore>, config: &Config) -> Self {
        let quota = QuotaTracker::new(
            store.clone(),
            config.quotas.clone(),
            config.retention.max_keep,
        );
        let reconciler = Reconciler::new(store.clone(), quota).with_batch_size(config.drain.batch_size);
        let writer = ArchiveWriter::new(&config.archive.export_dir, config.archive.format);
        Self::new(store, writer, reconciler, config.retention.max_keep)
            .with_batch_size(config.drain.batch_size)
            .with_reconcile_max_scan(Some(config.drain.reconcile_max_scan))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// `None` scans the whole queue.
    pub fn with_reconcile_max_scan(mut self, max_scan: Option<u64>) -> Self {
        self.reconcile_max_scan = max_scan;
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn max_keep(&self) -> u64 {
        self.max_keep
    }

    pub async fn drain(&self) -> Result<DrainStats, DrainError> {
        let _running = self.running.try_lock().map_err(|_| DrainError::AlreadyRunning)?;
        let started_at = Utc::now();
        let queue = self.store.name().to_string();

        let before = self.store.len().await?;
        if before <= self.max_keep {
            info!(queue = %queue, queue_len = before, max_keep = self.max_keep, "Queue within max_keep, nothing to drain");
            return Ok(DrainStats::noop(before, started_at));
        }
        let to_export = before - self.max_keep;
        info!(queue = %queue, queue_len = before, to_export, "Draining oldest records");

        let raw = self.read_tail(to_export).await?;
        let taken = raw.len() as u64;

        let mut records = Vec::with_capacity(raw.len());
        let mut errored = 0u64;
        for entry in &raw {
            match Record::from_json(entry) {
                Ok(record) => records.push(record),
                Err(e) => {
                    errored += 1;
                    debug!(error = %e, "Skipping unparseable entry during drain");
                }
            }
        }
        drop(raw);
        if errored > 0 {
            warn!(queue = %queue, errored, "Unparseable entries will be trimmed without archiving");
        }

        let batch = ArchiveBatch::new(records);
        let writer = self.writer.clone();
        let archive = tokio::task::spawn_blocking(move || writer.write(&batch))
            .await
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))
            .and_then(|written| written)
            .map_err(|e| {
                error!(queue = %queue, error = %e, "Archive write failed, queue left untouched");
                e
            })?;
        if archive.fallback {
            warn!(path = %archive.path.display(), "Archive written as json after encoder failure");
        }

        // Commit point. Trim exactly what was read, anchored at the tail.
        self.store.trim(0, -(taken as i64) - 1).await.map_err(|e| {
            error!(
                queue = %queue,
                path = %archive.path.display(),
                error = %e,
                "Trim failed after archiving; records remain queued and may be archived again"
            );
            e
        })?;

        let after = self.store.len().await?;
        let reconciliation = match self.reconciler.rebuild(self.reconcile_max_scan).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(queue = %queue, error = %e, "Counter reconciliation failed after drain");
                None
            }
        };

        let stats = DrainStats {
            started_at,
            finished_at: Utc::now(),
            queue_length_before: before,
            exported: archive.count as u64,
            errored,
            queue_length_after: after,
            archive: Some(archive),
            reconciliation,
        };
        info!(
            queue = %queue,
            before = stats.queue_length_before,
            exported = stats.exported,
            errored = stats.errored,
            after = stats.queue_length_after,
            path = ?stats.archive_path(),
            "Drain complete"
        );
        Ok(stats)
    }

    /// The oldest `count` entries in queue order, read in bounded chunks.
    async fn read_tail(&self, count: u64) -> Result<Vec<String>, DrainError> {
        let mut raw = Vec::with_capacity(count as usize);
        let mut offset = 0u64;
        while offset < count {
            let chunk = (count - offset).min(self.batch_size as u64);
            let start = offset as i64 - count as i64;
            let stop = start + chunk as i64 - 1;
            let batch = self.store.range(start, stop).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len() as u64;
            raw.extend(batch);
            debug!(read = offset, total = count, "Drain read progress");
        }
        Ok(raw)
    }
}

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;
