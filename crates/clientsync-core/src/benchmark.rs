// crates/clientsync-core/src/benchmark.rs
//
// Times CSV whole-file writes against database upserts for a few record
// counts. Synthetic rows live in a reserved row_id range and are deleted
// afterwards.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::csv_store::CsvStore;
use crate::db::DbStore;
use crate::record::ClientRecord;

/// Synthetic rows start here so they can never collide with real data.
const BENCHMARK_ROW_ID_BASE: i64 = 1_000_000;

#[derive(Debug, Serialize)]
pub struct BenchmarkEntry {
    pub record_count: usize,
    pub csv_write_seconds: f64,
    pub db_upsert_seconds: f64,
    pub csv_records_per_second: f64,
    pub db_records_per_second: f64,
    /// How many times faster the database path is; below 1.0 the CSV wins.
    pub db_speedup: f64,
}

#[derive(Debug, Serialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub iterations: usize,
    pub entries: Vec<BenchmarkEntry>,
}

pub fn synthetic_record(row_id: i64) -> ClientRecord {
    let mut record = ClientRecord::empty(row_id);
    record.name = Some(format!("Benchmark Client {row_id}"));
    record.email = Some(format!("bench{row_id}@example.com"));
    record.client_type = Some("benchmark".to_string());
    record.processed = row_id % 2 == 0;
    record.file_uuids = json!({ (format!("video_{row_id}.mp4")): Uuid::new_v4().to_string() });
    record.s3_paths =
        json!({ (format!("video_{row_id}.mp4")): format!("s3://typing-clients/{row_id}") });
    record
}

/// Runs the CSV-vs-database write benchmark. `work_dir` receives the scratch
/// CSV file; the database rows are cleaned up before returning.
pub async fn run_benchmark(
    db: &DbStore,
    work_dir: &Path,
    counts: &[usize],
    iterations: usize,
) -> Result<BenchmarkReport> {
    let iterations = iterations.max(1);
    let mut entries = Vec::new();

    for &count in counts {
        let records: Vec<ClientRecord> = (0..count as i64)
            .map(|offset| synthetic_record(BENCHMARK_ROW_ID_BASE + offset))
            .collect();

        let scratch_path = work_dir.join(format!("benchmark_{count}.csv"));
        let scratch = CsvStore::new(&scratch_path);
        let csv_started = Instant::now();
        for _ in 0..iterations {
            scratch.write(&records).context("benchmark CSV write failed")?;
        }
        let csv_write_seconds = csv_started.elapsed().as_secs_f64() / iterations as f64;

        let db_started = Instant::now();
        for _ in 0..iterations {
            for record in &records {
                db.upsert(record).await.context("benchmark DB upsert failed")?;
            }
        }
        let db_upsert_seconds = db_started.elapsed().as_secs_f64() / iterations as f64;

        let entry = BenchmarkEntry {
            record_count: count,
            csv_write_seconds,
            db_upsert_seconds,
            csv_records_per_second: rate(count, csv_write_seconds),
            db_records_per_second: rate(count, db_upsert_seconds),
            db_speedup: if db_upsert_seconds > 0.0 {
                csv_write_seconds / db_upsert_seconds
            } else {
                0.0
            },
        };
        info!(
            count,
            csv_seconds = entry.csv_write_seconds,
            db_seconds = entry.db_upsert_seconds,
            "benchmark pass finished"
        );
        entries.push(entry);

        let _ = std::fs::remove_file(&scratch_path);
    }

    sqlx::query("DELETE FROM typing_clients_data WHERE row_id >= $1")
        .bind(BENCHMARK_ROW_ID_BASE)
        .execute(db.pool())
        .await
        .context("cleaning up benchmark rows")?;

    Ok(BenchmarkReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        iterations,
        entries,
    })
}

fn rate(count: usize, seconds: f64) -> f64 {
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}
