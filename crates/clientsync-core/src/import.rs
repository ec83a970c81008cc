// crates/clientsync-core/src/import.rs

use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::csv_store::CsvStore;
use crate::db::DbStore;
use crate::error::{MigrationError, Result};
use crate::validator::{validate_full_migration, ConsistencyReport};

/// Cumulative failure rate that aborts a run mid-flight.
const ABORT_FAILURE_RATE: f64 = 0.10;
/// Final failure rate above which the run counts as failed even if it
/// completed.
const FAIL_FAILURE_RATE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub skip_validation: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: 100,
            skip_validation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub csv_path: String,
    pub total_records: usize,
    pub imported: usize,
    pub failed: usize,
    pub batches: usize,
    pub duration_seconds: f64,
    pub records_per_second: f64,
    pub success_rate: f64,
    pub validation: ValidationOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_row_ids: Vec<i64>,
}

impl ImportSummary {
    /// Whether the run should exit 0: an acceptable failure rate and a
    /// validation pass (when validation ran).
    pub fn succeeded(&self) -> bool {
        self.validation != ValidationOutcome::Failed
            && (self.total_records == 0
                || self.failed as f64 / self.total_records as f64 <= FAIL_FAILURE_RATE)
    }
}

/// Bulk CSV-to-database import. Per-record failures are counted and the loop
/// continues; a cumulative failure rate above 10% aborts the whole run.
/// Idempotent by upsert semantics: re-running converges to the same table.
pub async fn import_csv(
    db: &DbStore,
    csv: &CsvStore,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let run_id = Uuid::new_v4();
    let started = Instant::now();
    let records = csv.read()?;
    let total = records.len();
    info!(%run_id, total, batch_size = options.batch_size, "starting CSV import");

    let mut imported = 0usize;
    let mut failed = 0usize;
    let mut failed_row_ids = Vec::new();
    let mut batches = 0usize;

    for (batch_index, chunk) in records.chunks(options.batch_size.max(1)).enumerate() {
        batches += 1;
        let batch_name = format!("import_{run_id}_batch_{batch_index}");
        let batch_id = db.create_batch(&batch_name, chunk.len() as i64).await?;

        let mut batch_ok = 0i64;
        let mut batch_failed = 0i64;
        for record in chunk {
            match db.upsert(record).await {
                Ok(()) => {
                    imported += 1;
                    batch_ok += 1;
                }
                Err(err) => {
                    failed += 1;
                    batch_failed += 1;
                    failed_row_ids.push(record.row_id);
                    warn!(row_id = record.row_id, error = %err, "record import failed");
                }
            }
        }
        let batch_status = if batch_failed == 0 { "completed" } else { "completed_with_errors" };
        db.finish_batch(batch_id, batch_ok, batch_failed, batch_status)
            .await?;

        let processed = imported + failed;
        if processed > 0 && failed as f64 / processed as f64 > ABORT_FAILURE_RATE {
            let message = format!(
                "aborting import: {failed} of {processed} records failed (over {:.0}%)",
                ABORT_FAILURE_RATE * 100.0
            );
            db.record_migration_event(
                "csv_import",
                "bulk_upsert",
                "aborted",
                Some(processed as i64),
                Some(started.elapsed().as_secs_f64()),
                Some(message.as_str()),
                None,
            )
            .await?;
            return Err(MigrationError::Validation(message));
        }
    }

    let validation = if options.skip_validation {
        ValidationOutcome::Skipped
    } else {
        match validate_full_migration(db, csv).await {
            Ok(_) => ValidationOutcome::Passed,
            Err(err) => {
                warn!(error = %err, "post-import validation failed");
                ValidationOutcome::Failed
            }
        }
    };

    let duration_seconds = started.elapsed().as_secs_f64();
    let summary = ImportSummary {
        run_id,
        csv_path: csv.path().display().to_string(),
        total_records: total,
        imported,
        failed,
        batches,
        duration_seconds,
        records_per_second: if duration_seconds > 0.0 {
            imported as f64 / duration_seconds
        } else {
            0.0
        },
        success_rate: if total > 0 {
            imported as f64 / total as f64 * 100.0
        } else {
            100.0
        },
        validation,
        failed_row_ids,
    };

    let status = if summary.succeeded() { "completed" } else { "failed" };
    db.record_migration_event(
        "csv_import",
        "bulk_upsert",
        status,
        Some(total as i64),
        Some(duration_seconds),
        None,
        Some(&json!({
            "run_id": summary.run_id,
            "imported": summary.imported,
            "failed": summary.failed,
            "validation": summary.validation.clone(),
        })),
    )
    .await?;

    info!(
        %run_id,
        imported = summary.imported,
        failed = summary.failed,
        success_rate = summary.success_rate,
        "CSV import finished"
    );
    Ok(summary)
}

/// Re-exported for callers that want the validation report after an import.
pub async fn post_import_validation(db: &DbStore, csv: &CsvStore) -> Result<ConsistencyReport> {
    validate_full_migration(db, csv).await
}
