// crates/clientsync-core/src/validator.rs
//
// Fail-fast, fail-loud, fail-safely: divergence between the two stores is
// reported or raised, never silently repaired.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::csv_store::CsvStore;
use crate::db::DbStore;
use crate::error::{MigrationError, Result};
use crate::record::ClientRecord;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    Value,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMismatch {
    pub field: String,
    pub csv_value: String,
    pub db_value: String,
    pub kind: MismatchKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordMismatch {
    pub row_id: i64,
    pub fields: Vec<FieldMismatch>,
}

/// Outcome of a batch comparison between the two stores. Divergence lives in
/// the report; only `validate_full_migration` turns it into an error.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub run_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub csv_count: usize,
    pub db_count: usize,
    pub compared: usize,
    pub matched: usize,
    pub sampled: bool,
    pub missing_in_db: Vec<i64>,
    pub missing_in_csv: Vec<i64>,
    pub mismatched: Vec<RecordMismatch>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_db.is_empty()
            && self.missing_in_csv.is_empty()
            && self.mismatched.is_empty()
    }

    pub fn discrepancy_count(&self) -> usize {
        self.missing_in_db.len() + self.missing_in_csv.len() + self.mismatched.len()
    }
}

/// Canonical in-memory shape for comparison: whitespace-only strings become
/// `None`, surrounding whitespace is dropped. JSON fields are already objects
/// by construction.
pub fn canonicalize(record: &ClientRecord) -> ClientRecord {
    let mut out = record.clone();
    for field in [
        &mut out.name,
        &mut out.email,
        &mut out.client_type,
        &mut out.link,
        &mut out.extracted_links,
        &mut out.youtube_playlist,
        &mut out.google_drive,
        &mut out.document_text,
        &mut out.youtube_status,
        &mut out.youtube_files,
        &mut out.youtube_media_id,
        &mut out.drive_status,
        &mut out.drive_files,
        &mut out.drive_media_id,
        &mut out.download_errors,
    ] {
        *field = field
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }
    out
}

/// Field-by-field comparison of the canonicalized records. Each field is
/// compared under its own type: integers as integers, booleans as booleans,
/// timestamps as UTC instants, JSON columns as objects (key-order
/// independent), and text columns as optional strings. No cross-type
/// stringification.
pub fn compare_records(csv: &ClientRecord, db: &ClientRecord) -> Vec<FieldMismatch> {
    let csv = canonicalize(csv);
    let db = canonicalize(db);
    let mut mismatches = Vec::new();

    let mut push = |field: &str, csv_value: String, db_value: String, kind: MismatchKind| {
        mismatches.push(FieldMismatch {
            field: field.to_string(),
            csv_value,
            db_value,
            kind,
        });
    };

    if csv.row_id != db.row_id {
        push(
            "row_id",
            csv.row_id.to_string(),
            db.row_id.to_string(),
            MismatchKind::Value,
        );
    }

    let text_fields: [(&str, &Option<String>, &Option<String>); 15] = [
        ("name", &csv.name, &db.name),
        ("email", &csv.email, &db.email),
        ("type", &csv.client_type, &db.client_type),
        ("link", &csv.link, &db.link),
        ("extracted_links", &csv.extracted_links, &db.extracted_links),
        ("youtube_playlist", &csv.youtube_playlist, &db.youtube_playlist),
        ("google_drive", &csv.google_drive, &db.google_drive),
        ("document_text", &csv.document_text, &db.document_text),
        ("youtube_status", &csv.youtube_status, &db.youtube_status),
        ("youtube_files", &csv.youtube_files, &db.youtube_files),
        ("youtube_media_id", &csv.youtube_media_id, &db.youtube_media_id),
        ("drive_status", &csv.drive_status, &db.drive_status),
        ("drive_files", &csv.drive_files, &db.drive_files),
        ("drive_media_id", &csv.drive_media_id, &db.drive_media_id),
        ("download_errors", &csv.download_errors, &db.download_errors),
    ];
    for (name, csv_value, db_value) in text_fields {
        if csv_value != db_value {
            push(
                name,
                display_opt(csv_value),
                display_opt(db_value),
                MismatchKind::Value,
            );
        }
    }

    if csv.processed != db.processed {
        push(
            "processed",
            csv.processed.to_string(),
            db.processed.to_string(),
            MismatchKind::Value,
        );
    }
    if csv.permanent_failure != db.permanent_failure {
        push(
            "permanent_failure",
            csv.permanent_failure.to_string(),
            db.permanent_failure.to_string(),
            MismatchKind::Value,
        );
    }
    if csv.last_download_attempt != db.last_download_attempt {
        push(
            "last_download_attempt",
            csv.last_download_attempt
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "<unset>".to_string()),
            db.last_download_attempt
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "<unset>".to_string()),
            MismatchKind::Value,
        );
    }
    // serde_json::Value equality is structural, so key order never matters.
    if csv.file_uuids != db.file_uuids {
        push(
            "file_uuids",
            csv.file_uuids.to_string(),
            db.file_uuids.to_string(),
            MismatchKind::Json,
        );
    }
    if csv.s3_paths != db.s3_paths {
        push(
            "s3_paths",
            csv.s3_paths.to_string(),
            db.s3_paths.to_string(),
            MismatchKind::Json,
        );
    }

    mismatches
}

/// Post-write agreement check for the dual-write path. Any differing field
/// logs at ERROR and raises immediately.
pub fn validate_dual_write(csv: &ClientRecord, db: &ClientRecord) -> Result<()> {
    let mismatches = compare_records(csv, db);
    if mismatches.is_empty() {
        return Ok(());
    }
    for mismatch in &mismatches {
        error!(
            row_id = csv.row_id,
            field = %mismatch.field,
            csv_value = %mismatch.csv_value,
            db_value = %mismatch.db_value,
            "dual-write mismatch"
        );
    }
    let details = mismatches
        .iter()
        .map(|m| m.field.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(MigrationError::Consistency {
        row_id: csv.row_id,
        details: format!("fields differ: {details}"),
    })
}

/// Batch comparison of all (or a deterministic sample of) records present in
/// either store. Outcome is recorded in `data_validation` best-effort.
pub async fn check_consistency(
    db: &DbStore,
    csv: &CsvStore,
    sample: Option<usize>,
) -> Result<ConsistencyReport> {
    let csv_records: BTreeMap<i64, ClientRecord> = csv
        .read()?
        .into_iter()
        .map(|record| (record.row_id, record))
        .collect();
    let db_records: BTreeMap<i64, ClientRecord> = db
        .fetch_all()
        .await?
        .into_iter()
        .map(|record| (record.row_id, record))
        .collect();

    let mut report = ConsistencyReport {
        run_id: Uuid::new_v4(),
        checked_at: Utc::now(),
        csv_count: csv_records.len(),
        db_count: db_records.len(),
        compared: 0,
        matched: 0,
        sampled: false,
        missing_in_db: Vec::new(),
        missing_in_csv: Vec::new(),
        mismatched: Vec::new(),
    };

    for row_id in csv_records.keys() {
        if !db_records.contains_key(row_id) {
            report.missing_in_db.push(*row_id);
        }
    }
    for row_id in db_records.keys() {
        if !csv_records.contains_key(row_id) {
            report.missing_in_csv.push(*row_id);
        }
    }

    let common: Vec<i64> = csv_records
        .keys()
        .filter(|row_id| db_records.contains_key(row_id))
        .copied()
        .collect();
    let selected = match sample {
        Some(limit) if limit < common.len() => {
            report.sampled = true;
            sample_evenly(&common, limit)
        }
        _ => common,
    };

    for row_id in selected {
        let csv_record = &csv_records[&row_id];
        let db_record = &db_records[&row_id];
        report.compared += 1;
        let mismatches = compare_records(csv_record, db_record);
        if mismatches.is_empty() {
            report.matched += 1;
        } else {
            error!(row_id, fields = mismatches.len(), "record diverged between CSV and database");
            report.mismatched.push(RecordMismatch {
                row_id,
                fields: mismatches,
            });
        }
    }

    let status = if report.is_consistent() { "passed" } else { "failed" };
    let details = json!({
        "run_id": report.run_id,
        "missing_in_db": &report.missing_in_db,
        "missing_in_csv": &report.missing_in_csv,
        "mismatched_row_ids": report.mismatched.iter().map(|m| m.row_id).collect::<Vec<_>>(),
        "sampled": report.sampled,
    });
    if let Err(err) = db
        .record_validation(
            "consistency_check",
            report.csv_count as i64,
            report.db_count as i64,
            &details,
            status,
        )
        .await
    {
        warn!(error = %err, "could not record validation outcome");
    }

    info!(
        compared = report.compared,
        matched = report.matched,
        discrepancies = report.discrepancy_count(),
        status,
        "consistency check finished"
    );
    Ok(report)
}

/// Full post-migration gate: row counts, then every common record
/// field-by-field. Any discrepancy at all fails the migration.
pub async fn validate_full_migration(db: &DbStore, csv: &CsvStore) -> Result<ConsistencyReport> {
    let report = check_consistency(db, csv, None).await?;
    if report.csv_count != report.db_count {
        return Err(MigrationError::Validation(format!(
            "row count mismatch: csv has {} rows, database has {}",
            report.csv_count, report.db_count
        )));
    }
    if !report.is_consistent() {
        return Err(MigrationError::Validation(format!(
            "{} discrepancies found across {} compared records",
            report.discrepancy_count(),
            report.compared
        )));
    }
    Ok(report)
}

fn display_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "<empty>".to_string())
}

/// Deterministic sample: evenly spaced ids from the sorted common set, so
/// repeated runs compare the same rows.
fn sample_evenly(ids: &[i64], limit: usize) -> Vec<i64> {
    if limit == 0 || ids.is_empty() {
        return Vec::new();
    }
    let step = ids.len() as f64 / limit as f64;
    (0..limit)
        .map(|i| ids[(i as f64 * step) as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(row_id: i64) -> ClientRecord {
        let mut record = ClientRecord::empty(row_id);
        record.name = Some("Ada".to_string());
        record.email = Some("ada@example.com".to_string());
        record.processed = true;
        record.file_uuids = json!({"a.mp4": "uuid-1", "b.mp4": "uuid-2"});
        record
    }

    #[test]
    fn canonicalize_drops_whitespace_only_strings() {
        let mut raw = record(1);
        raw.name = Some("  Ada  ".to_string());
        raw.document_text = Some("   ".to_string());
        let canon = canonicalize(&raw);
        assert_eq!(canon.name.as_deref(), Some("Ada"));
        assert_eq!(canon.document_text, None);
    }

    #[test]
    fn identical_records_produce_no_mismatches() {
        assert!(compare_records(&record(1), &record(1)).is_empty());
    }

    #[test]
    fn json_comparison_ignores_key_order() {
        let csv = record(1);
        let mut db = record(1);
        db.file_uuids =
            serde_json::from_str(r#"{"b.mp4": "uuid-2", "a.mp4": "uuid-1"}"#).unwrap();
        assert!(compare_records(&csv, &db).is_empty());
    }

    #[test]
    fn differing_fields_are_each_reported() {
        let csv = record(1);
        let mut db = record(1);
        db.name = Some("Grace".to_string());
        db.processed = false;
        db.s3_paths = json!({"a.mp4": "s3://bucket/a.mp4"});
        let mismatches = compare_records(&csv, &db);
        let fields: Vec<&str> = mismatches.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "processed", "s3_paths"]);
        assert_eq!(mismatches[2].kind, MismatchKind::Json);
    }

    #[test]
    fn dual_write_validation_fails_loud() {
        let csv = record(1);
        let mut db = record(1);
        db.email = Some("grace@example.com".to_string());
        let err = validate_dual_write(&csv, &db).unwrap_err();
        match err {
            MigrationError::Consistency { row_id, details } => {
                assert_eq!(row_id, 1);
                assert!(details.contains("email"));
            }
            other => panic!("expected Consistency error, got {other}"),
        }
    }

    #[test]
    fn even_sampling_is_deterministic_and_in_bounds() {
        let ids: Vec<i64> = (0..100).collect();
        let first = sample_evenly(&ids, 10);
        let second = sample_evenly(&ids, 10);
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }
}
