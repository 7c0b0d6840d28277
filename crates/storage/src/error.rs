use std::path::PathBuf;

use thiserror::Error;

use feedstash_queue::StoreError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error in {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("not an archive file: {0}")]
    UnknownFormat(PathBuf),
}

impl From<parquet::errors::ParquetError> for ArchiveError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        ArchiveError::Encode(format!("parquet: {e}"))
    }
}

impl From<arrow::error::ArrowError> for ArchiveError {
    fn from(e: arrow::error::ArrowError) -> Self {
        ArchiveError::Encode(format!("arrow: {e}"))
    }
}

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("export failed: {0}")]
    Export(#[from] ArchiveError),

    #[error("drain state error: {0}")]
    State(String),

    #[error("a drain is already running")]
    AlreadyRunning,
}
