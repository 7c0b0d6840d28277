use std::fs;
use std::path::Path;

use feedstash_core::config::ArchiveFormat;

use super::{columnar, json, ArchiveContents};
use crate::error::ArchiveError;

/// Read any archive file back, picking the decoder from the file name.
pub fn read_archive(path: &Path) -> Result<ArchiveContents, ArchiveError> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let format = ArchiveFormat::from_file_name(name)
        .ok_or_else(|| ArchiveError::UnknownFormat(path.to_path_buf()))?;

    let decoded = match format {
        ArchiveFormat::Json => json::decode(&fs::read(path)?, false),
        ArchiveFormat::JsonZstd => json::decode(&fs::read(path)?, true),
        ArchiveFormat::Parquet => columnar::read(path),
    };
    decoded.map_err(|reason| ArchiveError::Decode {
        path: path.to_path_buf(),
        reason,
    })
}
