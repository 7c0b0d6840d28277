//! Columnar archives.
//!
//! Records are schemaless, so column types are inferred per field across the
//! batch: a field whose values are all strings, all integers, all floats or
//! all booleans gets a native column; anything else (objects, arrays, mixed
//! types, explicit `null`) is stored as JSON text and listed in the file
//! metadata so the reader can parse it back. A Parquet null always means the
//! field was missing from that record.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde_json::{Map, Number, Value};

use feedstash_core::config::ArchiveFormat;
use feedstash_core::Record;

use super::{ArchiveBatch, ArchiveContents, ArchiveEncoder};
use crate::error::ArchiveError;

const META_EXPORT_TIME: &str = "feedstash.export_time";
const META_COUNT: &str = "feedstash.count";
const META_JSON_COLUMNS: &str = "feedstash.json_columns";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
    Json,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ColumnKind::Text,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Number(n) if n.is_i64() => ColumnKind::Int,
            Value::Number(n) if n.is_f64() => ColumnKind::Float,
            _ => ColumnKind::Json,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Bool => DataType::Boolean,
            ColumnKind::Text | ColumnKind::Json => DataType::Utf8,
        }
    }
}

/// Field names in first-seen order, each with its inferred kind.
fn infer_columns(records: &[Record]) -> Vec<(String, ColumnKind)> {
    let mut order: Vec<String> = Vec::new();
    let mut kinds: HashMap<String, Option<ColumnKind>> = HashMap::new();

    for record in records {
        for (name, value) in record.fields() {
            let slot = kinds.entry(name.clone()).or_insert_with(|| {
                order.push(name.clone());
                None
            });
            // `null` must stay distinct from a missing field
            let kind = ColumnKind::of(value);
            *slot = match *slot {
                None => Some(kind),
                Some(prev) if prev == kind => Some(prev),
                Some(_) => Some(ColumnKind::Json),
            };
        }
    }

    order
        .into_iter()
        .map(|name| {
            let kind = kinds.get(&name).copied().flatten().unwrap_or(ColumnKind::Json);
            (name, kind)
        })
        .collect()
}

fn build_column(records: &[Record], name: &str, kind: ColumnKind) -> Result<ArrayRef, ArchiveError> {
    let n = records.len();
    let values = records.iter().map(|r| r.get(name));

    let array: ArrayRef = match kind {
        ColumnKind::Int => {
            let mut builder = Int64Builder::with_capacity(n);
            for v in values {
                builder.append_option(v.and_then(Value::as_i64));
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Float => {
            let mut builder = Float64Builder::with_capacity(n);
            for v in values {
                builder.append_option(v.and_then(Value::as_f64));
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(n);
            for v in values {
                builder.append_option(v.and_then(Value::as_bool));
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Text => {
            let mut builder = StringBuilder::with_capacity(n, n * 32);
            for v in values {
                builder.append_option(v.and_then(Value::as_str));
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Json => {
            let mut builder = StringBuilder::with_capacity(n, n * 64);
            for v in values {
                match v {
                    Some(v) => builder.append_value(
                        serde_json::to_string(v).map_err(|e| ArchiveError::Encode(e.to_string()))?,
                    ),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

/// Parquet with zstd-compressed pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetEncoder;

impl ArchiveEncoder for ParquetEncoder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Parquet
    }

    fn encode(&self, batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError> {
        let columns = infer_columns(&batch.records);
        if columns.is_empty() {
            return Err(ArchiveError::Encode("batch has no fields to store as columns".into()));
        }

        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, kind)| Field::new(name, kind.data_type(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays = columns
            .iter()
            .map(|(name, kind)| build_column(&batch.records, name, *kind))
            .collect::<Result<Vec<_>, _>>()?;
        let record_batch = RecordBatch::try_new(schema.clone(), arrays)?;

        let json_columns: Vec<&str> = columns
            .iter()
            .filter(|(_, kind)| *kind == ColumnKind::Json)
            .map(|(name, _)| name.as_str())
            .collect();
        let json_columns =
            serde_json::to_string(&json_columns).map_err(|e| ArchiveError::Encode(e.to_string()))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(Default::default()))
            .set_key_value_metadata(Some(vec![
                KeyValue::new(META_EXPORT_TIME.to_string(), Some(batch.export_time.to_rfc3339())),
                KeyValue::new(META_COUNT.to_string(), Some(batch.records.len().to_string())),
                KeyValue::new(META_JSON_COLUMNS.to_string(), Some(json_columns)),
            ]))
            .build();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))?;
        writer.write(&record_batch)?;
        writer.close()?;
        Ok(buf)
    }
}

fn decode_column(
    array: &ArrayRef,
    name: &str,
    is_json: bool,
    rows: &mut [Map<String, Value>],
) -> Result<(), String> {
    let mismatch = || format!("column '{name}' has unexpected type {}", array.data_type());

    for (i, row) in rows.iter_mut().enumerate() {
        if array.is_null(i) {
            continue;
        }
        let value = match array.data_type() {
            DataType::Int64 => {
                let a = array.as_any().downcast_ref::<Int64Array>().ok_or_else(mismatch)?;
                Value::from(a.value(i))
            }
            DataType::Float64 => {
                let a = array.as_any().downcast_ref::<Float64Array>().ok_or_else(mismatch)?;
                Number::from_f64(a.value(i)).map(Value::Number).unwrap_or(Value::Null)
            }
            DataType::Boolean => {
                let a = array.as_any().downcast_ref::<BooleanArray>().ok_or_else(mismatch)?;
                Value::Bool(a.value(i))
            }
            DataType::Utf8 => {
                let a = array.as_any().downcast_ref::<StringArray>().ok_or_else(mismatch)?;
                let text = a.value(i);
                if is_json {
                    serde_json::from_str(text).map_err(|e| format!("column '{name}': {e}"))?
                } else {
                    Value::String(text.to_string())
                }
            }
            _ => return Err(mismatch()),
        };
        row.insert(name.to_string(), value);
    }
    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<ArchiveContents, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| e.to_string())?;

    let metadata: HashMap<String, String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|kvs| {
            kvs.iter()
                .filter_map(|kv| kv.value.clone().map(|v| (kv.key.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    let export_time = metadata
        .get(META_EXPORT_TIME)
        .ok_or_else(|| format!("missing {META_EXPORT_TIME} metadata"))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).map_err(|e| e.to_string()))?
        .with_timezone(&Utc);
    let json_columns: Vec<String> = match metadata.get(META_JSON_COLUMNS) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };

    let reader = builder.build().map_err(|e| e.to_string())?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| e.to_string())?;
        let mut rows = vec![Map::new(); batch.num_rows()];
        for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
            let name = field.name();
            decode_column(array, name, json_columns.contains(name), &mut rows)?;
        }
        records.extend(rows.into_iter().map(Record::new));
    }

    if let Some(expected) = metadata.get(META_COUNT).and_then(|c| c.parse::<usize>().ok()) {
        if expected != records.len() {
            return Err(format!(
                "metadata says {expected} records but file has {}",
                records.len()
            ));
        }
    }

    Ok(ArchiveContents {
        export_time,
        count: records.len(),
        records,
    })
}
