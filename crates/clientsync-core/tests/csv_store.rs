use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use clientsync_core::csv_store::CsvStore;
use clientsync_core::error::MigrationError;
use clientsync_core::record::ClientRecord;

fn sample_records() -> Vec<ClientRecord> {
    let mut first = ClientRecord::empty(1);
    first.name = Some("Ada Lovelace".to_string());
    first.email = Some("ada@example.com".to_string());
    first.client_type = Some("FF-Ti/Se".to_string());
    first.processed = true;
    first.last_download_attempt = Some(Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap());
    first.file_uuids = json!({"intro.mp4": "4f2c0a9e"});
    first.s3_paths = json!({"intro.mp4": "s3://typing-clients/4f2c0a9e"});

    let mut second = ClientRecord::empty(2);
    second.name = Some("Grace Hopper".to_string());
    second.youtube_playlist = Some(
        "https://youtube.com/playlist?list=a|https://youtube.com/playlist?list=b".to_string(),
    );

    let third = ClientRecord::empty(3);
    vec![first, second, third]
}

#[test]
fn write_then_read_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    let records = sample_records();
    store.write(&records).unwrap();
    assert_eq!(store.read().unwrap(), records);
}

#[test]
fn write_is_atomic_and_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    store.write(&sample_records()).unwrap();
    store.write(&sample_records()).unwrap();
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn upsert_replaces_existing_and_appends_new() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    store.write(&sample_records()).unwrap();

    let mut updated = ClientRecord::empty(2);
    updated.name = Some("Grace Murray Hopper".to_string());
    store.upsert(&updated).unwrap();
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(
        store.get(2).unwrap().unwrap().name.as_deref(),
        Some("Grace Murray Hopper")
    );

    store.upsert(&ClientRecord::empty(4)).unwrap();
    assert_eq!(store.count().unwrap(), 4);
}

#[test]
fn upsert_creates_a_missing_file() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("fresh.csv"));
    store.upsert(&ClientRecord::empty(10)).unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn delete_reports_whether_anything_was_removed() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    store.write(&sample_records()).unwrap();
    assert!(store.delete(3).unwrap());
    assert!(!store.delete(3).unwrap());
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn read_maps_columns_by_name_not_position() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reordered.csv");
    std::fs::write(
        &path,
        "name,row_id,processed,file_uuids\nAda,7,True,\"{\"\"a.mp4\"\": \"\"u1\"\"}\"\n",
    )
    .unwrap();
    let records = CsvStore::new(&path).read().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].row_id, 7);
    assert_eq!(records[0].name.as_deref(), Some("Ada"));
    assert!(records[0].processed);
    assert_eq!(records[0].file_uuids, json!({"a.mp4": "u1"}));
}

#[test]
fn missing_row_id_is_a_data_shape_error_naming_the_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "row_id,name\n1,Ada\n,Grace\n").unwrap();
    let err = CsvStore::new(&path).read().unwrap_err();
    match err {
        MigrationError::DataShape(message) => assert!(message.contains("line 3"), "{message}"),
        other => panic!("expected DataShape, got {other}"),
    }
}

#[test]
fn backup_is_a_faithful_copy() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    store.write(&sample_records()).unwrap();
    let backup = store.create_backup("test").unwrap();
    let name = backup.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("output_backup_test_"));
    assert_eq!(
        std::fs::read_to_string(store.path()).unwrap(),
        std::fs::read_to_string(&backup).unwrap()
    );
}

#[test]
fn integrity_check_flags_duplicates_and_bad_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dirty.csv");
    std::fs::write(&path, "row_id,name\n1,Ada\n1,Ada again\nnot-a-number,Grace\n").unwrap();
    let report = CsvStore::new(&path).verify_integrity().unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.duplicate_row_ids, vec![1]);
    assert_eq!(report.parse_errors.len(), 1);
    // The sparse header is also reported.
    assert!(report.missing_headers.contains(&"processed".to_string()));
}

#[test]
fn clean_file_passes_integrity() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path().join("output.csv"));
    store.write(&sample_records()).unwrap();
    let report = store.verify_integrity().unwrap();
    assert!(report.is_valid(), "{report:?}");
    assert_eq!(report.row_count, 3);
}
