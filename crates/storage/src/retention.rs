//! Age-based cleanup of the export directory.
//!
//! A file is deleted only when the timestamp in its name is strictly older
//! than `now - retention_days`. Names without a parseable timestamp are
//! never deleted. A retention window reaching past the earliest representable
//! date expires nothing.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use feedstash_core::config::ArchiveConfig;

use crate::archive::list_archives;
use crate::error::ArchiveError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub deleted: usize,
    pub bytes_freed: u64,
    pub kept: usize,
    pub skipped_unparseable: usize,
    /// Expired files that could not be removed.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionSweep {
    dir: PathBuf,
    retention_days: u32,
}

impl RetentionSweep {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(&config.export_dir, config.retention_days)
    }

    /// `None` when the window reaches past the earliest representable date.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.retention_days))
            .and_then(|window| now.checked_sub_signed(window))
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, ArchiveError> {
        let cutoff = self.cutoff(now);
        if cutoff.is_none() {
            debug!(
                retention_days = self.retention_days,
                "Retention window exceeds calendar, nothing expires"
            );
        }
        let mut stats = SweepStats::default();

        for entry in list_archives(&self.dir)? {
            let Some(created) = entry.created else {
                debug!(file = %entry.name, "Archive name has no timestamp, leaving it");
                stats.skipped_unparseable += 1;
                continue;
            };
            if cutoff.map_or(true, |cutoff| created >= cutoff) {
                stats.kept += 1;
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    debug!(file = %entry.name, created = %created, "Deleted expired archive");
                    stats.deleted += 1;
                    stats.bytes_freed += entry.size_bytes;
                }
                Err(e) => {
                    warn!(file = %entry.name, error = %e, "Failed to delete expired archive");
                    stats.failed += 1;
                }
            }
        }

        if stats.deleted > 0 || stats.failed > 0 {
            info!(
                dir = %self.dir.display(),
                deleted = stats.deleted,
                freed_mb = stats.bytes_freed as f64 / (1024.0 * 1024.0),
                kept = stats.kept,
                failed = stats.failed,
                "Retention sweep finished"
            );
        }
        Ok(stats)
    }
}
