//! Archive file names.
//!
//! Names look like `data_export_YYYYMMDD_HHMMSS.{ext}`, with an optional
//! `_N` suffix when two drains land in the same second. The retention sweep
//! reads the creation time back out of the name, so the layout must not
//! change.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use feedstash_core::config::ArchiveFormat;

pub const ARCHIVE_PREFIX: &str = "data_export_";

/// Files the sweep and inventory consider at all.
const MANAGED_PREFIX: &str = "data_";

const DATE_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn file_name(created: DateTime<Utc>, format: ArchiveFormat) -> String {
    format!(
        "{}{}.{}",
        ARCHIVE_PREFIX,
        created.format(DATE_FORMAT),
        format.extension()
    )
}

/// First free path for an archive created at `created` in `dir`.
pub fn unique_path(dir: &Path, created: DateTime<Utc>, format: ArchiveFormat) -> PathBuf {
    let candidate = dir.join(file_name(created, format));
    if !candidate.exists() {
        return candidate;
    }
    let stamp = created.format(DATE_FORMAT);
    let mut n = 1u32;
    loop {
        let name = format!("{ARCHIVE_PREFIX}{stamp}_{n}.{}", format.extension());
        let path = dir.join(name);
        if !path.exists() {
            return path;
        }
        n += 1;
    }
}

/// True for names the sweep manages: `data_*` with a known extension.
pub fn is_archive_name(name: &str) -> bool {
    name.starts_with(MANAGED_PREFIX) && ArchiveFormat::from_file_name(name).is_some()
}

/// Creation time embedded in an archive name.
///
/// Looks for an 8-digit date token followed by a 6-digit time token among
/// the `_`-separated parts of the stem. `None` if no such pair parses.
pub fn parse_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let format = ArchiveFormat::from_file_name(name)?;
    let stem = name.strip_suffix(format.extension())?.strip_suffix('.')?;
    let parts: Vec<&str> = stem.split('_').collect();

    parts.windows(2).find_map(|pair| {
        let (date, time) = (pair[0], pair[1]);
        let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(date, 8) || !digits(time, 6) {
            return None;
        }
        NaiveDateTime::parse_from_str(&format!("{date}_{time}"), DATE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    })
}
