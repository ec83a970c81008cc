// crates/clientsync-core/src/record.rs

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Fixed CSV header order for the typing-clients dataset. Readers map columns
/// by name, so reordered input files still parse; writers always emit this
/// order.
pub const CSV_HEADERS: [&str; 21] = [
    "row_id",
    "name",
    "email",
    "type",
    "link",
    "extracted_links",
    "youtube_playlist",
    "google_drive",
    "processed",
    "document_text",
    "youtube_status",
    "youtube_files",
    "youtube_media_id",
    "drive_status",
    "drive_files",
    "drive_media_id",
    "last_download_attempt",
    "download_errors",
    "permanent_failure",
    "file_uuids",
    "s3_paths",
];

/// One row of the dataset, shared by the CSV and database adapters so that
/// normalization rules live in exactly one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientRecord {
    pub row_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub client_type: Option<String>,
    pub link: Option<String>,
    pub extracted_links: Option<String>,
    pub youtube_playlist: Option<String>,
    pub google_drive: Option<String>,
    pub processed: bool,
    pub document_text: Option<String>,
    pub youtube_status: Option<String>,
    pub youtube_files: Option<String>,
    pub youtube_media_id: Option<String>,
    pub drive_status: Option<String>,
    pub drive_files: Option<String>,
    pub drive_media_id: Option<String>,
    pub last_download_attempt: Option<DateTime<Utc>>,
    pub download_errors: Option<String>,
    pub permanent_failure: bool,
    pub file_uuids: Value,
    pub s3_paths: Value,
}

impl ClientRecord {
    /// A record with every optional field empty, booleans false, and empty
    /// JSON objects. Mutate the fields you care about.
    pub fn empty(row_id: i64) -> Self {
        ClientRecord {
            row_id,
            name: None,
            email: None,
            client_type: None,
            link: None,
            extracted_links: None,
            youtube_playlist: None,
            google_drive: None,
            processed: false,
            document_text: None,
            youtube_status: None,
            youtube_files: None,
            youtube_media_id: None,
            drive_status: None,
            drive_files: None,
            drive_media_id: None,
            last_download_attempt: None,
            download_errors: None,
            permanent_failure: false,
            file_uuids: Value::Object(Default::default()),
            s3_paths: Value::Object(Default::default()),
        }
    }

    /// Field values in `CSV_HEADERS` order, encoded for the flat file.
    pub fn to_csv_fields(&self) -> Vec<String> {
        vec![
            self.row_id.to_string(),
            encode_opt(&self.name),
            encode_opt(&self.email),
            encode_opt(&self.client_type),
            encode_opt(&self.link),
            encode_opt(&self.extracted_links),
            encode_opt(&self.youtube_playlist),
            encode_opt(&self.google_drive),
            encode_bool(self.processed),
            encode_opt(&self.document_text),
            encode_opt(&self.youtube_status),
            encode_opt(&self.youtube_files),
            encode_opt(&self.youtube_media_id),
            encode_opt(&self.drive_status),
            encode_opt(&self.drive_files),
            encode_opt(&self.drive_media_id),
            encode_timestamp(&self.last_download_attempt),
            encode_opt(&self.download_errors),
            encode_bool(self.permanent_failure),
            encode_json(&self.file_uuids),
            encode_json(&self.s3_paths),
        ]
    }
}

/// Empty or whitespace-only strings become `None`; everything else is kept
/// verbatim.
pub fn empty_to_none(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Boolean columns are stored as `True`/`False`/empty in the flat file, but
/// historical rows also carry `yes`/`1`/`on` variants. Anything unrecognized
/// parses as false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

/// JSON-valued columns hold a JSON-encoded object string. Empty cells and
/// invalid JSON both normalize to `{}`; invalid input is logged, not fatal.
pub fn parse_json_object(field: &str, raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            warn!(field, value = %other, "JSON column holds a non-object; treating as empty");
            Value::Object(Default::default())
        }
        Err(err) => {
            warn!(field, error = %err, "invalid JSON in column; treating as empty");
            Value::Object(Default::default())
        }
    }
}

/// Timestamps are RFC 3339 in the flat file; unparsable values normalize to
/// `None` with a warning rather than failing the row.
pub fn parse_timestamp(field: &str, raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            warn!(field, raw = trimmed, error = %err, "unparsable timestamp; treating as unset");
            None
        }
    }
}

fn encode_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn encode_bool(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

fn encode_timestamp(value: &Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn encode_json(value: &Value) -> String {
    match value {
        Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn bool_parsing_accepts_historical_variants() {
        for truthy in ["True", "true", "YES", "1", "on"] {
            assert!(parse_bool(truthy), "{truthy} should parse as true");
        }
        for falsy in ["False", "", "no", "0", "maybe"] {
            assert!(!parse_bool(falsy), "{falsy} should parse as false");
        }
    }

    #[test]
    fn invalid_json_normalizes_to_empty_object() {
        assert_eq!(parse_json_object("file_uuids", ""), json!({}));
        assert_eq!(parse_json_object("file_uuids", "{not json"), json!({}));
        assert_eq!(parse_json_object("file_uuids", "[1, 2]"), json!({}));
        assert_eq!(
            parse_json_object("file_uuids", r#"{"a.mp4": "uuid-1"}"#),
            json!({"a.mp4": "uuid-1"})
        );
    }

    #[test]
    fn unparsable_timestamp_becomes_none() {
        assert_eq!(parse_timestamp("last_download_attempt", "yesterday"), None);
        assert_eq!(parse_timestamp("last_download_attempt", ""), None);
        let expected = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(
            parse_timestamp("last_download_attempt", "2025-06-01T12:30:00Z"),
            Some(expected)
        );
    }

    #[test]
    fn csv_fields_match_header_arity() {
        let record = ClientRecord::empty(7);
        assert_eq!(record.to_csv_fields().len(), CSV_HEADERS.len());
    }

    #[test]
    fn booleans_encode_in_legacy_casing() {
        let mut record = ClientRecord::empty(1);
        record.processed = true;
        let fields = record.to_csv_fields();
        assert_eq!(fields[8], "True");
        assert_eq!(fields[18], "False");
    }
}
