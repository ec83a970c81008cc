// crates/clientsync-core/src/report.rs

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// Filesystem-friendly timestamp used in report and checkpoint names.
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Writes `<prefix>_<timestamp>.json` under `dir`, creating the directory if
/// needed, and returns the path. Every batch operation ends with one of
/// these.
pub fn write_json_report<T: Serialize>(dir: &Path, prefix: &str, report: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{prefix}_{}.json", timestamp_slug(Utc::now())));
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    info!(path = %path.display(), "wrote report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_file_is_created_with_prefix_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json_report(dir.path(), "import_summary", &json!({"imported": 3})).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("import_summary_"));
        assert!(name.ends_with(".json"));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"imported\": 3"));
    }
}
