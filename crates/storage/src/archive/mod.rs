//! Archive files: encoding, durable writes, reading back, and listing.

pub mod columnar;
pub mod inventory;
pub mod json;
pub mod naming;
pub mod reader;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use feedstash_core::config::ArchiveFormat;
use feedstash_core::Record;

use crate::error::ArchiveError;

pub use inventory::{list_archives, ArchiveEntry, ArchiveInventory};
pub use json::JsonEncoder;
pub use columnar::ParquetEncoder;
pub use reader::read_archive;

/// Records headed for one archive file, in queue order (newest first).
#[derive(Debug, Clone)]
pub struct ArchiveBatch {
    pub export_time: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl ArchiveBatch {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            export_time: Utc::now(),
            records,
        }
    }

    pub fn with_export_time(mut self, export_time: DateTime<Utc>) -> Self {
        self.export_time = export_time;
        self
    }
}

/// An archive file read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContents {
    pub export_time: DateTime<Utc>,
    pub count: usize,
    pub records: Vec<Record>,
}

pub trait ArchiveEncoder: Send + Sync {
    fn format(&self) -> ArchiveFormat;

    fn encode(&self, batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError>;
}

pub fn encoder_for(format: ArchiveFormat) -> Box<dyn ArchiveEncoder> {
    match format {
        ArchiveFormat::Json => Box::new(JsonEncoder::plain()),
        ArchiveFormat::JsonZstd => Box::new(JsonEncoder::compressed()),
        ArchiveFormat::Parquet => Box::new(ParquetEncoder),
    }
}

/// Where a batch ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    /// The configured encoder failed and plain JSON was written instead.
    pub fallback: bool,
    pub file_size_bytes: u64,
    pub count: usize,
}

/// Writes batches into an export directory.
pub struct ArchiveWriter {
    dir: PathBuf,
    encoder: Box<dyn ArchiveEncoder>,
}

impl ArchiveWriter {
    pub fn new(dir: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self::with_encoder(dir, encoder_for(format))
    }

    pub fn with_encoder(dir: impl Into<PathBuf>, encoder: Box<dyn ArchiveEncoder>) -> Self {
        Self {
            dir: dir.into(),
            encoder,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> ArchiveFormat {
        self.encoder.format()
    }

    /// Encode and durably write one batch.
    ///
    /// If the configured encoder is not plain JSON and fails, the batch is
    /// written as plain JSON instead. The file is complete and synced to disk
    /// when this returns `Ok`.
    pub fn write(&self, batch: &ArchiveBatch) -> Result<ArchiveOutcome, ArchiveError> {
        let primary = self.encoder.format();
        let (bytes, format, fallback) = match self.encoder.encode(batch) {
            Ok(bytes) => (bytes, primary, false),
            Err(e) if primary != ArchiveFormat::Json => {
                warn!(format = %primary, error = %e, "Archive encoder failed, falling back to json");
                (JsonEncoder::plain().encode(batch)?, ArchiveFormat::Json, true)
            }
            Err(e) => return Err(e),
        };

        fs::create_dir_all(&self.dir)?;
        let path = naming::unique_path(&self.dir, batch.export_time, format);
        write_durable(&path, &bytes)?;

        debug!(path = %path.display(), bytes = bytes.len(), records = batch.records.len(), "Archive written");
        Ok(ArchiveOutcome {
            path,
            format,
            fallback,
            file_size_bytes: bytes.len() as u64,
            count: batch.records.len(),
        })
    }
}

/// Write to a hidden temp file, sync, rename into place, then sync the
/// directory so the rename itself survives a crash.
fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::UnknownFormat(path.to_path_buf()))?;
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_parent_dir(path)
    })();

    if let Err(e) = result {
        fs::remove_file(&tmp).ok();
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::File::open(dir)?.sync_all(),
        _ => fs::File::open(".")?.sync_all(),
    }
}

// Directories cannot be opened as files here.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
