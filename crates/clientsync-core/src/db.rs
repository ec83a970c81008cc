// crates/clientsync-core/src/db.rs

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::config::DbConfig;
use crate::error::Result;
use crate::record::ClientRecord;

/// Column list shared by every SELECT against `typing_clients_data`. The
/// `type` column is aliased so it maps onto `ClientRecord::client_type`.
const RECORD_COLUMNS: &str = "row_id, name, email, type AS client_type, link, extracted_links, \
     youtube_playlist, google_drive, processed, document_text, youtube_status, youtube_files, \
     youtube_media_id, drive_status, drive_files, drive_media_id, last_download_attempt, \
     download_errors, permanent_failure, file_uuids, s3_paths";

/// Establishes the process-wide connection pool, failing fast when the
/// server is unreachable.
pub async fn connect(config: &DbConfig, database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await?;
    debug!(host = %config.host, database = %config.database, "database connection pool established");
    Ok(pool)
}

/// Builds a pool without touching the network. Connection errors surface on
/// first use; the outage-simulation paths and tests rely on this.
pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(acquire_timeout)
        .connect_lazy(database_url)?;
    Ok(pool)
}

/// Runs the embedded schema migrations; idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(sqlx::Error::from)?;
    Ok(())
}

/// Database accessor for `typing_clients_data` and the migration bookkeeping
/// tables. All failures surface as errors; callers decide whether to fall
/// back to the CSV copy or abort.
#[derive(Debug, Clone)]
pub struct DbStore {
    pool: PgPool,
}

impl DbStore {
    pub fn new(pool: PgPool) -> Self {
        DbStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get(&self, row_id: i64) -> Result<Option<ClientRecord>> {
        let record = sqlx::query_as::<_, ClientRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM typing_clients_data WHERE row_id = $1"
        ))
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn fetch_all(&self) -> Result<Vec<ClientRecord>> {
        let records = sqlx::query_as::<_, ClientRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM typing_clients_data ORDER BY row_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM typing_clients_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn filter_by_processed(&self, processed: bool) -> Result<Vec<ClientRecord>> {
        let records = sqlx::query_as::<_, ClientRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM typing_clients_data WHERE processed = $1 ORDER BY row_id"
        ))
        .bind(processed)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Idempotent insert-or-update keyed on `row_id`, bumping `updated_at` on
    /// the update path.
    pub async fn upsert(&self, record: &ClientRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO typing_clients_data (
                row_id, name, email, type, link, extracted_links, youtube_playlist,
                google_drive, processed, document_text, youtube_status, youtube_files,
                youtube_media_id, drive_status, drive_files, drive_media_id,
                last_download_attempt, download_errors, permanent_failure, file_uuids, s3_paths
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21
            )
            ON CONFLICT (row_id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                type = EXCLUDED.type,
                link = EXCLUDED.link,
                extracted_links = EXCLUDED.extracted_links,
                youtube_playlist = EXCLUDED.youtube_playlist,
                google_drive = EXCLUDED.google_drive,
                processed = EXCLUDED.processed,
                document_text = EXCLUDED.document_text,
                youtube_status = EXCLUDED.youtube_status,
                youtube_files = EXCLUDED.youtube_files,
                youtube_media_id = EXCLUDED.youtube_media_id,
                drive_status = EXCLUDED.drive_status,
                drive_files = EXCLUDED.drive_files,
                drive_media_id = EXCLUDED.drive_media_id,
                last_download_attempt = EXCLUDED.last_download_attempt,
                download_errors = EXCLUDED.download_errors,
                permanent_failure = EXCLUDED.permanent_failure,
                file_uuids = EXCLUDED.file_uuids,
                s3_paths = EXCLUDED.s3_paths,
                updated_at = NOW()
            "#,
        )
        .bind(record.row_id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.client_type)
        .bind(&record.link)
        .bind(&record.extracted_links)
        .bind(&record.youtube_playlist)
        .bind(&record.google_drive)
        .bind(record.processed)
        .bind(&record.document_text)
        .bind(&record.youtube_status)
        .bind(&record.youtube_files)
        .bind(&record.youtube_media_id)
        .bind(&record.drive_status)
        .bind(&record.drive_files)
        .bind(&record.drive_media_id)
        .bind(record.last_download_attempt)
        .bind(&record.download_errors)
        .bind(record.permanent_failure)
        .bind(&record.file_uuids)
        .bind(&record.s3_paths)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, row_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM typing_clients_data WHERE row_id = $1")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a row to `migration_log`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_migration_event(
        &self,
        operation: &str,
        phase: &str,
        status: &str,
        record_count: Option<i64>,
        duration_seconds: Option<f64>,
        error_message: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_log
                (operation, phase, status, record_count, duration_seconds, error_message, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(operation)
        .bind(phase)
        .bind(status)
        .bind(record_count)
        .bind(duration_seconds)
        .bind(error_message)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends an outcome row to `data_validation`.
    pub async fn record_validation(
        &self,
        validation_type: &str,
        csv_count: i64,
        db_count: i64,
        mismatch_details: &Value,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data_validation
                (validation_type, table_name, csv_count, db_count, mismatch_details, status)
            VALUES ($1, 'typing_clients_data', $2, $3, $4, $5)
            "#,
        )
        .bind(validation_type)
        .bind(csv_count)
        .bind(db_count)
        .bind(mismatch_details)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_batch(&self, batch_name: &str, total_records: i64) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO migration_batches (batch_name, total_records, status)
            VALUES ($1, $2, 'running')
            RETURNING id
            "#,
        )
        .bind(batch_name)
        .bind(total_records)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn finish_batch(
        &self,
        batch_id: i64,
        completed_records: i64,
        failed_records: i64,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE migration_batches
            SET completed_records = $2, failed_records = $3, status = $4, completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(completed_records)
        .bind(failed_records)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a row to `migration_state`, used by the archive tooling.
    pub async fn record_state(
        &self,
        operation_type: &str,
        source_path: Option<&str>,
        destination_path: Option<&str>,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_state
                (operation_type, source_path, destination_path, status, error_message, completed_at)
            VALUES ($1, $2, $3, $4, $5, CASE WHEN $4 IN ('completed', 'failed') THEN NOW() END)
            "#,
        )
        .bind(operation_type)
        .bind(source_path)
        .bind(destination_path)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Confirms that the expected tables exist, returning the missing names.
    pub async fn missing_tables(&self) -> Result<Vec<String>> {
        let expected = [
            "typing_clients_data",
            "migration_log",
            "data_validation",
            "migration_batches",
            "migration_state",
        ];
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .fetch_all(&self.pool)
        .await?;
        let present: std::collections::HashSet<&str> =
            rows.iter().map(|(name,)| name.as_str()).collect();
        Ok(expected
            .iter()
            .filter(|name| !present.contains(**name))
            .map(|name| name.to_string())
            .collect())
    }
}
