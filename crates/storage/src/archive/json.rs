//! JSON archive bodies: `{"export_time": ..., "count": ..., "data": [...]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedstash_core::config::ArchiveFormat;
use feedstash_core::Record;

use super::{ArchiveBatch, ArchiveContents, ArchiveEncoder};
use crate::error::ArchiveError;

const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize)]
struct BodyRef<'a> {
    export_time: DateTime<Utc>,
    count: usize,
    data: &'a [Record],
}

#[derive(Deserialize)]
struct Body {
    export_time: DateTime<Utc>,
    count: usize,
    data: Vec<Record>,
}

/// Plain or zstd-compressed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder {
    compressed: bool,
}

impl JsonEncoder {
    pub fn plain() -> Self {
        Self { compressed: false }
    }

    pub fn compressed() -> Self {
        Self { compressed: true }
    }
}

impl ArchiveEncoder for JsonEncoder {
    fn format(&self) -> ArchiveFormat {
        if self.compressed {
            ArchiveFormat::JsonZstd
        } else {
            ArchiveFormat::Json
        }
    }

    fn encode(&self, batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError> {
        let body = BodyRef {
            export_time: batch.export_time,
            count: batch.records.len(),
            data: &batch.records,
        };
        if self.compressed {
            let raw = serde_json::to_vec(&body).map_err(|e| ArchiveError::Encode(e.to_string()))?;
            Ok(zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?)
        } else {
            serde_json::to_vec_pretty(&body).map_err(|e| ArchiveError::Encode(e.to_string()))
        }
    }
}

pub(crate) fn decode(bytes: &[u8], compressed: bool) -> Result<ArchiveContents, String> {
    let body: Body = if compressed {
        let raw = zstd::decode_all(bytes).map_err(|e| format!("zstd: {e}"))?;
        serde_json::from_slice(&raw).map_err(|e| e.to_string())?
    } else {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())?
    };

    if body.count != body.data.len() {
        return Err(format!(
            "header says {} records but body has {}",
            body.count,
            body.data.len()
        ));
    }
    Ok(ArchiveContents {
        export_time: body.export_time,
        count: body.count,
        records: body.data,
    })
}
