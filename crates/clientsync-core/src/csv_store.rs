// crates/clientsync-core/src/csv_store.rs

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::StringRecord;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{MigrationError, Result};
use crate::record::{
    empty_to_none, parse_bool, parse_json_object, parse_timestamp, ClientRecord, CSV_HEADERS,
};

/// Flat-file accessor for the typing-clients dataset. Reads load the whole
/// file; writes rewrite it completely (read-modify-write). Safe only for
/// single-process sequential use.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record, mapping columns by header name so reordered files
    /// still parse. A row without a usable `row_id` is a hard error naming
    /// the offending line.
    pub fn read(&self) -> Result<Vec<ClientRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let index = HeaderIndex::from_headers(reader.headers()?)?;

        let mut records = Vec::new();
        for (offset, row) in reader.records().enumerate() {
            let row = row?;
            // Line 1 is the header, so data starts at line 2.
            let line = offset as u64 + 2;
            records.push(record_from_row(&index, &row, line)?);
        }
        debug!(path = %self.path.display(), rows = records.len(), "read CSV file");
        Ok(records)
    }

    /// Rewrites the complete file atomically: serialize to a temp file in the
    /// same directory, then rename over the original.
    pub fn write(&self, records: &[ClientRecord]) -> Result<()> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp_path)?;
            writer.write_record(CSV_HEADERS)?;
            for record in records {
                writer.write_record(record.to_csv_fields())?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), rows = records.len(), "rewrote CSV file");
        Ok(())
    }

    pub fn get(&self, row_id: i64) -> Result<Option<ClientRecord>> {
        Ok(self
            .read()?
            .into_iter()
            .find(|record| record.row_id == row_id))
    }

    /// Read-modify-write upsert: replace the record with a matching `row_id`
    /// or append a new one. A missing file counts as an empty dataset so the
    /// first write can create it.
    pub fn upsert(&self, record: &ClientRecord) -> Result<()> {
        let mut records = self.read_or_empty()?;
        match records.iter_mut().find(|r| r.row_id == record.row_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.write(&records)
    }

    /// Removes the record with the given `row_id`. Returns whether anything
    /// was deleted.
    pub fn delete(&self, row_id: i64) -> Result<bool> {
        let mut records = self.read()?;
        let before = records.len();
        records.retain(|record| record.row_id != row_id);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records)?;
        Ok(true)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Copies the file to `<stem>_backup_<operation>_<timestamp>.csv` next to
    /// it, returning the backup path.
    pub fn create_backup(&self, operation: &str) -> Result<PathBuf> {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("data");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup_name = format!("{stem}_backup_{operation}_{timestamp}.csv");
        let backup_path = self
            .path
            .parent()
            .map(|dir| dir.join(&backup_name))
            .unwrap_or_else(|| PathBuf::from(&backup_name));
        fs::copy(&self.path, &backup_path)?;
        info!(backup = %backup_path.display(), operation, "created CSV backup");
        Ok(backup_path)
    }

    /// Structural integrity pass: header check, duplicate `row_id` detection,
    /// per-row parse errors. Divergence is reported, never repaired.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            path: self.path.display().to_string(),
            row_count: 0,
            missing_headers: Vec::new(),
            duplicate_row_ids: Vec::new(),
            parse_errors: Vec::new(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let present: HashSet<&str> = headers.iter().collect();
        for expected in CSV_HEADERS {
            if !present.contains(expected) {
                report.missing_headers.push(expected.to_string());
            }
        }

        let index = match HeaderIndex::from_headers(&headers) {
            Ok(index) => index,
            Err(err) => {
                report.parse_errors.push(err.to_string());
                return Ok(report);
            }
        };

        let mut seen: HashSet<i64> = HashSet::new();
        for (offset, row) in reader.records().enumerate() {
            let line = offset as u64 + 2;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    report.parse_errors.push(format!("line {line}: {err}"));
                    continue;
                }
            };
            match record_from_row(&index, &row, line) {
                Ok(record) => {
                    report.row_count += 1;
                    if !seen.insert(record.row_id) {
                        report.duplicate_row_ids.push(record.row_id);
                    }
                }
                Err(err) => report.parse_errors.push(err.to_string()),
            }
        }
        Ok(report)
    }

    fn read_or_empty(&self) -> Result<Vec<ClientRecord>> {
        if self.path.exists() {
            self.read()
        } else {
            Ok(Vec::new())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub path: String,
    pub row_count: usize,
    pub missing_headers: Vec<String>,
    pub duplicate_row_ids: Vec<i64>,
    pub parse_errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.missing_headers.is_empty()
            && self.duplicate_row_ids.is_empty()
            && self.parse_errors.is_empty()
    }
}

struct HeaderIndex {
    columns: HashMap<String, usize>,
}

impl HeaderIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(position, name)| (name.trim().to_string(), position))
            .collect();
        if !columns.contains_key("row_id") {
            return Err(MigrationError::DataShape(
                "CSV file has no row_id column".to_string(),
            ));
        }
        Ok(HeaderIndex { columns })
    }

    fn field<'a>(&self, row: &'a StringRecord, name: &str) -> &'a str {
        self.columns
            .get(name)
            .and_then(|&position| row.get(position))
            .unwrap_or("")
    }
}

fn record_from_row(index: &HeaderIndex, row: &StringRecord, line: u64) -> Result<ClientRecord> {
    let raw_id = index.field(row, "row_id").trim();
    let row_id: i64 = raw_id.parse().map_err(|_| {
        MigrationError::DataShape(format!("line {line}: missing or invalid row_id '{raw_id}'"))
    })?;

    let opt = |name: &str| empty_to_none(index.field(row, name));
    Ok(ClientRecord {
        row_id,
        name: opt("name"),
        email: opt("email"),
        client_type: opt("type"),
        link: opt("link"),
        extracted_links: opt("extracted_links"),
        youtube_playlist: opt("youtube_playlist"),
        google_drive: opt("google_drive"),
        processed: parse_bool(index.field(row, "processed")),
        document_text: opt("document_text"),
        youtube_status: opt("youtube_status"),
        youtube_files: opt("youtube_files"),
        youtube_media_id: opt("youtube_media_id"),
        drive_status: opt("drive_status"),
        drive_files: opt("drive_files"),
        drive_media_id: opt("drive_media_id"),
        last_download_attempt: parse_timestamp(
            "last_download_attempt",
            index.field(row, "last_download_attempt"),
        ),
        download_errors: opt("download_errors"),
        permanent_failure: parse_bool(index.field(row, "permanent_failure")),
        file_uuids: parse_json_object("file_uuids", index.field(row, "file_uuids")),
        s3_paths: parse_json_object("s3_paths", index.field(row, "s3_paths")),
    })
}
