use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use feedstash_core::config::ArchiveFormat;

use super::naming;
use crate::error::ArchiveError;

/// One managed file in the export directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub name: String,
    pub format: ArchiveFormat,
    /// Creation time from the name; `None` when the name does not parse.
    pub created: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// Managed files in `dir`, sorted by name. A missing directory is empty.
pub fn list_archives(dir: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !naming::is_archive_name(&name) {
            continue;
        }
        let Some(format) = ArchiveFormat::from_file_name(&name) else {
            continue;
        };
        entries.push(ArchiveEntry {
            path: entry.path(),
            created: naming::parse_timestamp(&name),
            name,
            format,
            size_bytes: meta.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveInventory {
    pub files: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub by_format: BTreeMap<String, usize>,
    /// Files whose name carries no timestamp.
    pub unparseable: usize,
}

impl ArchiveInventory {
    pub fn scan(dir: &Path) -> Result<Self, ArchiveError> {
        let mut inv = Self::default();
        for entry in list_archives(dir)? {
            inv.files += 1;
            inv.total_bytes += entry.size_bytes;
            *inv.by_format.entry(entry.format.to_string()).or_insert(0) += 1;
            match entry.created {
                Some(ts) => {
                    inv.oldest = Some(inv.oldest.map_or(ts, |o| o.min(ts)));
                    inv.newest = Some(inv.newest.map_or(ts, |n| n.max(ts)));
                }
                None => inv.unparseable += 1,
            }
        }
        Ok(inv)
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}
