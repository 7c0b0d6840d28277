use super::*;

use chrono::TimeZone;
use serde_json::{json, Value};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedstash-{tag}-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn sample_records() -> Vec<Record> {
    vec![
        Record::with_source("reddit")
            .with("title", "Rust 2.0 announced")
            .with("score", 812)
            .with("ratio", 0.93)
            .with("nsfw", false)
            .with("tags", json!(["rust", "lang"])),
        Record::with_source("hn")
            .with("title", "Show HN: a queue")
            .with("meta", json!({"rank": 3, "by": "pg"})),
        Record::with_source("news").with("url", "https://example.com/a"),
    ]
}

struct BrokenEncoder;

impl ArchiveEncoder for BrokenEncoder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Parquet
    }

    fn encode(&self, _batch: &ArchiveBatch) -> Result<Vec<u8>, ArchiveError> {
        Err(ArchiveError::Encode("simulated encoder failure".into()))
    }
}

#[test]
fn test_round_trip_every_format() {
    let dir = temp_dir("archive-roundtrip");
    let export_time = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    for format in [ArchiveFormat::Json, ArchiveFormat::JsonZstd, ArchiveFormat::Parquet] {
        let batch = ArchiveBatch::new(sample_records()).with_export_time(export_time);
        let outcome = ArchiveWriter::new(&dir, format).write(&batch).unwrap();

        assert_eq!(outcome.format, format);
        assert!(!outcome.fallback);
        assert_eq!(outcome.count, 3);
        assert_eq!(fs::metadata(&outcome.path).unwrap().len(), outcome.file_size_bytes);

        let contents = read_archive(&outcome.path).unwrap();
        assert_eq!(contents.export_time, export_time, "{format}");
        assert_eq!(contents.count, 3, "{format}");
        assert_eq!(contents.records, batch.records, "{format}");
    }

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_parquet_keeps_explicit_nulls() {
    let dir = temp_dir("archive-nulls");
    let batch = ArchiveBatch::new(vec![
        Record::with_source("reddit").with("title", "a").with("edited", Value::Null),
        Record::with_source("reddit").with("title", "b"),
        Record::with_source("hn").with("title", "c").with("edited", 1_700_000_000),
    ]);

    let outcome = ArchiveWriter::new(&dir, ArchiveFormat::Parquet).write(&batch).unwrap();
    assert!(!outcome.fallback);

    let back = read_archive(&outcome.path).unwrap();
    assert_eq!(back.records, batch.records);
    assert_eq!(back.records[0].get("edited"), Some(&Value::Null));
    assert_eq!(back.records[1].get("edited"), None);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_durable_write_leaves_no_temp_files() {
    let dir = temp_dir("archive-durable");
    let path = dir.join("data_export_20250601_120000.json");

    write_durable(&path, b"{}").unwrap();
    write_durable(&dir.join("data_export_20250601_120001.json"), b"[]").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"{}");
    let names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_durable_write_into_missing_dir_fails_cleanly() {
    let root = temp_dir("archive-nodir");
    let dir = root.join("gone");
    let err = write_durable(&dir.join("data_export_20250601_120000.json"), b"{}").unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
    assert!(!dir.exists());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    fs::remove_dir_all(&root).ok();
}

#[test]
fn test_failed_encoder_falls_back_to_json() {
    let dir = temp_dir("archive-fallback");
    let writer = ArchiveWriter::with_encoder(&dir, Box::new(BrokenEncoder));
    let batch = ArchiveBatch::new(sample_records());

    let outcome = writer.write(&batch).unwrap();
    assert!(outcome.fallback);
    assert_eq!(outcome.format, ArchiveFormat::Json);
    assert!(outcome.path.to_string_lossy().ends_with(".json"));
    assert_eq!(read_archive(&outcome.path).unwrap().records, batch.records);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_empty_batch_parquet_falls_back() {
    let dir = temp_dir("archive-empty");
    let outcome = ArchiveWriter::new(&dir, ArchiveFormat::Parquet)
        .write(&ArchiveBatch::new(Vec::new()))
        .unwrap();
    assert!(outcome.fallback);
    assert_eq!(read_archive(&outcome.path).unwrap().count, 0);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_same_second_writes_do_not_collide() {
    let dir = temp_dir("archive-collide");
    let export_time = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let writer = ArchiveWriter::new(&dir, ArchiveFormat::Json);

    let a = writer
        .write(&ArchiveBatch::new(sample_records()).with_export_time(export_time))
        .unwrap();
    let b = writer
        .write(&ArchiveBatch::new(sample_records()).with_export_time(export_time))
        .unwrap();

    assert_ne!(a.path, b.path);
    let names: Vec<String> = list_archives(&dir).unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec![
            "data_export_20250601_120000.json".to_string(),
            "data_export_20250601_120000_1.json".to_string(),
        ]
    );
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_read_rejects_unknown_and_corrupt_files() {
    let dir = temp_dir("archive-corrupt");
    let txt = dir.join("data_export_20250101_000000.txt");
    fs::write(&txt, b"hello").unwrap();
    assert!(matches!(read_archive(&txt), Err(ArchiveError::UnknownFormat(_))));

    let bad = dir.join("data_export_20250101_000000.json");
    fs::write(&bad, b"{not json").unwrap();
    assert!(matches!(read_archive(&bad), Err(ArchiveError::Decode { .. })));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_inventory_summarizes_directory() {
    let dir = temp_dir("archive-inventory");
    fs::write(dir.join("data_export_20250101_000000.json"), b"{}").unwrap();
    fs::write(dir.join("data_export_20250301_000000.parquet"), b"1234").unwrap();
    fs::write(dir.join("data_export_manual.json"), b"{}").unwrap();
    fs::write(dir.join("README.md"), b"ignored").unwrap();

    let inv = ArchiveInventory::scan(&dir).unwrap();
    assert_eq!(inv.files, 3);
    assert_eq!(inv.total_bytes, 8);
    assert_eq!(inv.unparseable, 1);
    assert_eq!(inv.by_format.get("json"), Some(&2));
    assert_eq!(inv.oldest, Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
    assert_eq!(inv.newest, Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_inventory_of_missing_dir_is_empty() {
    let dir = std::env::temp_dir().join(format!("feedstash-missing-{}", uuid::Uuid::new_v4()));
    assert_eq!(ArchiveInventory::scan(&dir).unwrap(), ArchiveInventory::default());
}
