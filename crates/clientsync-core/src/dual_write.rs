// crates/clientsync-core/src/dual_write.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::csv_store::CsvStore;
use crate::db::DbStore;
use crate::error::{MigrationError, Result};
use crate::record::ClientRecord;
use crate::validator::{compare_records, FieldMismatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Database,
    Csv,
}

/// One observed database-to-CSV fallback. Carried on return values so the
/// switch is a visible, testable variant rather than a logging side effect.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackEvent {
    pub operation: String,
    pub identifier: Option<i64>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A read result together with the store that actually served it.
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
    pub fallback: Option<FallbackEvent>,
}

/// Outcome of a dual write. Validation mismatches are reported here and
/// logged, never rolled back; there is no transactional coordination between
/// the two stores.
#[derive(Debug)]
pub struct WriteOutcome {
    pub database_written: bool,
    pub csv_written: bool,
    pub fallback: Option<FallbackEvent>,
    pub mismatches: Vec<FieldMismatch>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_operations: u64,
    pub database_reads: u64,
    pub database_writes: u64,
    pub csv_fallbacks: u64,
    pub forced_csv_reads: u64,
    pub read_errors: u64,
    pub validation_mismatches: u64,
    pub fallback_rate: f64,
    pub database_success_rate: f64,
    pub fallback_events: Vec<FallbackEvent>,
}

#[derive(Debug, Default)]
struct Metrics {
    total_operations: u64,
    database_reads: u64,
    database_writes: u64,
    csv_fallbacks: u64,
    forced_csv_reads: u64,
    read_errors: u64,
    validation_mismatches: u64,
    fallback_events: Vec<FallbackEvent>,
}

impl Metrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_operations.max(1) as f64;
        MetricsSnapshot {
            total_operations: self.total_operations,
            database_reads: self.database_reads,
            database_writes: self.database_writes,
            csv_fallbacks: self.csv_fallbacks,
            forced_csv_reads: self.forced_csv_reads,
            read_errors: self.read_errors,
            validation_mismatches: self.validation_mismatches,
            fallback_rate: self.csv_fallbacks as f64 / total * 100.0,
            database_success_rate: (self.database_reads + self.database_writes) as f64 / total
                * 100.0,
            fallback_events: self.fallback_events.clone(),
        }
    }
}

/// Database-primary accessor with CSV fallback: every operation tries
/// Postgres first and falls back to the flat file on failure. No retry, no
/// backoff, no circuit breaker; both stores failing fails the operation.
pub struct DualWriteManager {
    db: DbStore,
    csv: CsvStore,
    validate: bool,
    backed_up: bool,
    metrics: Metrics,
}

impl DualWriteManager {
    pub fn new(db: DbStore, csv: CsvStore, validate: bool) -> Self {
        DualWriteManager {
            db,
            csv,
            validate,
            backed_up: false,
            metrics: Metrics::default(),
        }
    }

    pub fn csv(&self) -> &CsvStore {
        &self.csv
    }

    pub fn db(&self) -> &DbStore {
        &self.db
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn count_records(&mut self) -> Result<Fetched<usize>> {
        self.metrics.total_operations += 1;
        let db_result = self.db.count().await;
        match db_result {
            Ok(count) => {
                self.metrics.database_reads += 1;
                Ok(Fetched {
                    value: count as usize,
                    source: Source::Database,
                    fallback: None,
                })
            }
            Err(db_err) => {
                let event = self.fall_back("count_records", None, &db_err);
                match self.csv.count() {
                    Ok(count) => Ok(Fetched {
                        value: count,
                        source: Source::Csv,
                        fallback: Some(event),
                    }),
                    Err(csv_err) => {
                        self.metrics.read_errors += 1;
                        Err(both_failed("count_records", &db_err, &csv_err))
                    }
                }
            }
        }
    }

    /// Single-record read. A database miss counts as a fallback trigger, the
    /// same as an exception: the CSV copy may still hold the row.
    pub async fn get_record(&mut self, row_id: i64) -> Result<Fetched<Option<ClientRecord>>> {
        self.metrics.total_operations += 1;
        let db_result = self.db.get(row_id).await;
        match db_result {
            Ok(Some(record)) => {
                self.metrics.database_reads += 1;
                if self.validate {
                    self.cross_check(&record);
                }
                Ok(Fetched {
                    value: Some(record),
                    source: Source::Database,
                    fallback: None,
                })
            }
            Ok(None) => {
                let reason = "not found in database".to_string();
                let event = self.fallback_event("get_record", Some(row_id), reason);
                match self.csv.get(row_id) {
                    Ok(value) => Ok(Fetched {
                        value,
                        source: Source::Csv,
                        fallback: Some(event),
                    }),
                    Err(csv_err) => {
                        self.metrics.read_errors += 1;
                        Err(csv_err)
                    }
                }
            }
            Err(db_err) => {
                let event = self.fall_back("get_record", Some(row_id), &db_err);
                match self.csv.get(row_id) {
                    Ok(value) => Ok(Fetched {
                        value,
                        source: Source::Csv,
                        fallback: Some(event),
                    }),
                    Err(csv_err) => {
                        self.metrics.read_errors += 1;
                        Err(both_failed("get_record", &db_err, &csv_err))
                    }
                }
            }
        }
    }

    pub async fn read_all(&mut self, force_csv: bool) -> Result<Fetched<Vec<ClientRecord>>> {
        self.metrics.total_operations += 1;
        if force_csv {
            self.metrics.forced_csv_reads += 1;
            return Ok(Fetched {
                value: self.csv.read()?,
                source: Source::Csv,
                fallback: None,
            });
        }
        let db_result = self.db.fetch_all().await;
        match db_result {
            Ok(records) => {
                self.metrics.database_reads += 1;
                Ok(Fetched {
                    value: records,
                    source: Source::Database,
                    fallback: None,
                })
            }
            Err(db_err) => {
                let event = self.fall_back("read_all", None, &db_err);
                match self.csv.read() {
                    Ok(records) => Ok(Fetched {
                        value: records,
                        source: Source::Csv,
                        fallback: Some(event),
                    }),
                    Err(csv_err) => {
                        self.metrics.read_errors += 1;
                        Err(both_failed("read_all", &db_err, &csv_err))
                    }
                }
            }
        }
    }

    pub async fn filter_by_processed(
        &mut self,
        processed: bool,
    ) -> Result<Fetched<Vec<ClientRecord>>> {
        self.metrics.total_operations += 1;
        let db_result = self.db.filter_by_processed(processed).await;
        match db_result {
            Ok(records) => {
                self.metrics.database_reads += 1;
                Ok(Fetched {
                    value: records,
                    source: Source::Database,
                    fallback: None,
                })
            }
            Err(db_err) => {
                let event = self.fall_back("filter_by_processed", None, &db_err);
                match self.csv.read() {
                    Ok(records) => Ok(Fetched {
                        value: records
                            .into_iter()
                            .filter(|record| record.processed == processed)
                            .collect(),
                        source: Source::Csv,
                        fallback: Some(event),
                    }),
                    Err(csv_err) => {
                        self.metrics.read_errors += 1;
                        Err(both_failed("filter_by_processed", &db_err, &csv_err))
                    }
                }
            }
        }
    }

    /// Dual write: the database is attempted first, the CSV is always
    /// written. A database failure is a fallback event, not an error, as long
    /// as the CSV write lands.
    pub async fn write_record(&mut self, record: &ClientRecord) -> Result<WriteOutcome> {
        self.metrics.total_operations += 1;
        self.ensure_backup()?;

        let db_result = self.db.upsert(record).await;
        let (database_written, fallback, db_err) = match db_result {
            Ok(()) => {
                self.metrics.database_writes += 1;
                (true, None, None)
            }
            Err(err) => {
                let event = self.fall_back("write_record", Some(record.row_id), &err);
                (false, Some(event), Some(err))
            }
        };

        let csv_written = match self.csv.upsert(record) {
            Ok(()) => true,
            Err(csv_err) => {
                if let Some(db_err) = db_err {
                    return Err(both_failed("write_record", &db_err, &csv_err));
                }
                warn!(row_id = record.row_id, error = %csv_err, "CSV side of dual write failed");
                false
            }
        };

        let mismatches = if self.validate && database_written && csv_written {
            self.post_write_check(record.row_id).await
        } else {
            Vec::new()
        };

        Ok(WriteOutcome {
            database_written,
            csv_written,
            fallback,
            mismatches,
        })
    }

    /// Read-modify-write through the dual path. The current value may come
    /// from either store; the mutated value is written to both.
    pub async fn update_record<F>(&mut self, row_id: i64, mutate: F) -> Result<WriteOutcome>
    where
        F: FnOnce(&mut ClientRecord),
    {
        let fetched = self.get_record(row_id).await?;
        let mut record = fetched.value.ok_or_else(|| {
            MigrationError::DataShape(format!("row {row_id} not found in either store"))
        })?;
        mutate(&mut record);
        record.row_id = row_id;
        self.write_record(&record).await
    }

    pub async fn delete_record(&mut self, row_id: i64) -> Result<WriteOutcome> {
        self.metrics.total_operations += 1;
        self.ensure_backup()?;

        let db_result = self.db.delete(row_id).await;
        let (database_written, fallback, db_err) = match db_result {
            Ok(deleted) => {
                self.metrics.database_writes += 1;
                (deleted, None, None)
            }
            Err(err) => {
                let event = self.fall_back("delete_record", Some(row_id), &err);
                (false, Some(event), Some(err))
            }
        };

        let csv_written = match self.csv.delete(row_id) {
            Ok(deleted) => deleted,
            Err(csv_err) => {
                if let Some(db_err) = db_err {
                    return Err(both_failed("delete_record", &db_err, &csv_err));
                }
                warn!(row_id, error = %csv_err, "CSV side of dual delete failed");
                false
            }
        };

        Ok(WriteOutcome {
            database_written,
            csv_written,
            fallback,
            mismatches: Vec::new(),
        })
    }

    /// Backs the CSV file up once, before the manager's first mutation.
    fn ensure_backup(&mut self) -> Result<()> {
        if self.backed_up || !self.csv.path().exists() {
            self.backed_up = true;
            return Ok(());
        }
        self.csv.create_backup("dual_write")?;
        self.backed_up = true;
        Ok(())
    }

    async fn post_write_check(&mut self, row_id: i64) -> Vec<FieldMismatch> {
        let db_record = match self.db.get(row_id).await {
            Ok(Some(record)) => record,
            _ => return Vec::new(),
        };
        let csv_record = match self.csv.get(row_id) {
            Ok(Some(record)) => record,
            _ => return Vec::new(),
        };
        let mismatches = compare_records(&csv_record, &db_record);
        if !mismatches.is_empty() {
            self.metrics.validation_mismatches += 1;
            for mismatch in &mismatches {
                error!(
                    row_id,
                    field = %mismatch.field,
                    csv_value = %mismatch.csv_value,
                    db_value = %mismatch.db_value,
                    "post-write validation mismatch"
                );
            }
        }
        mismatches
    }

    /// Cross-checks a database read against the CSV copy when validation is
    /// on. Divergence is counted and logged, never fails the read.
    fn cross_check(&mut self, db_record: &ClientRecord) {
        let csv_record = match self.csv.get(db_record.row_id) {
            Ok(Some(record)) => record,
            _ => return,
        };
        let mismatches = compare_records(&csv_record, db_record);
        if !mismatches.is_empty() {
            self.metrics.validation_mismatches += 1;
            error!(
                row_id = db_record.row_id,
                fields = mismatches.len(),
                "read validation found CSV/database divergence"
            );
        }
    }

    fn fall_back(
        &mut self,
        operation: &str,
        identifier: Option<i64>,
        err: &MigrationError,
    ) -> FallbackEvent {
        self.fallback_event(operation, identifier, err.to_string())
    }

    fn fallback_event(
        &mut self,
        operation: &str,
        identifier: Option<i64>,
        reason: String,
    ) -> FallbackEvent {
        warn!(operation, ?identifier, %reason, "falling back to CSV");
        self.metrics.csv_fallbacks += 1;
        let event = FallbackEvent {
            operation: operation.to_string(),
            identifier,
            reason,
            at: Utc::now(),
        };
        self.metrics.fallback_events.push(event.clone());
        event
    }
}

fn both_failed(operation: &str, db_err: &MigrationError, csv_err: &MigrationError) -> MigrationError {
    info!(operation, "both stores failed; propagating");
    MigrationError::BothStoresFailed {
        operation: operation.to_string(),
        database: db_err.to_string(),
        csv: csv_err.to_string(),
    }
}
