use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use clientsync_core::config::AppConfig;
use clientsync_core::csv_store::CsvStore;
use clientsync_core::db::{self, DbStore};
use clientsync_core::dual_write::{DualWriteManager, Source};
use clientsync_core::import::{import_csv, ImportOptions};
use clientsync_core::pipeline::{
    latest_checkpoint, load_checkpoint, run_pipeline, PipelineOptions,
};
use clientsync_core::report::write_json_report;
use clientsync_core::validator::check_consistency;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Mismatch and missing-id detail printed to the console is capped here; the
/// JSON report always carries everything.
const PRINT_DETAIL_CAP: usize = 20;

#[derive(Parser, Debug)]
#[command(author, version, about = "Typing-clients CSV to PostgreSQL migration CLI", long_about = None)]
struct Cli {
    /// Path to a clientsync.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update the database schema and verify the expected tables
    Schema,
    /// Bulk-import the CSV dataset into the database
    Import(ImportArgs),
    /// Compare CSV and database record-by-record
    Check(CheckArgs),
    /// Read a single record through the dual-write manager
    Record(RecordArgs),
    /// Count records through the dual-write manager
    Count(CountArgs),
    /// Run the schema, import, and validate stages in sequence
    Pipeline(PipelineArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// CSV file to import (defaults to the configured path)
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Records per tracked batch
    #[arg(long, default_value_t = 100)]
    batch_size: usize,
    /// Skip the full post-import validation pass
    #[arg(long)]
    skip_validation: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// CSV file to compare (defaults to the configured path)
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Compare only a deterministic sample of this many common rows
    #[arg(long)]
    sample: Option<usize>,
    /// Verify CSV structural integrity only; no database needed
    #[arg(long)]
    csv_only: bool,
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// The record's row_id
    row_id: i64,
    /// Serve the read from the CSV copy, bypassing the database
    #[arg(long)]
    force_csv: bool,
}

#[derive(Args, Debug)]
struct CountArgs {
    /// Count only records with this processed flag
    #[arg(long)]
    processed: Option<bool>,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Resume from the latest checkpoint instead of starting over
    #[arg(long)]
    resume: bool,
    /// List the stages without executing anything
    #[arg(long)]
    dry_run: bool,
    /// Print the latest checkpoint and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Schema => handle_schema(&config).await,
        Command::Import(args) => handle_import(&config, args).await,
        Command::Check(args) => handle_check(&config, args).await,
        Command::Record(args) => handle_record(&config, args).await,
        Command::Count(args) => handle_count(&config, args).await,
        Command::Pipeline(args) => handle_pipeline(&config, args).await,
    }
}

async fn handle_schema(config: &AppConfig) -> Result<()> {
    let pool = db::connect(&config.database, &config.database_url())
        .await
        .context("could not connect to the database")?;
    db::run_migrations(&pool).await?;
    let store = DbStore::new(pool);
    let missing = store.missing_tables().await?;
    if !missing.is_empty() {
        bail!("schema incomplete, missing tables: {}", missing.join(", "));
    }
    let count = store.count().await?;
    println!("Schema ready; typing_clients_data holds {count} records.");
    Ok(())
}

async fn handle_import(config: &AppConfig, args: ImportArgs) -> Result<()> {
    let csv = CsvStore::new(args.csv.unwrap_or_else(|| config.csv_path.clone()));
    let pool = db::connect(&config.database, &config.database_url())
        .await
        .context("could not connect to the database")?;
    db::run_migrations(&pool).await?;
    let store = DbStore::new(pool);

    let options = ImportOptions {
        batch_size: args.batch_size,
        skip_validation: args.skip_validation,
    };
    let summary = import_csv(&store, &csv, &options).await?;
    let report_path = write_json_report(&config.report_dir, "import_summary", &summary)?;

    println!(
        "Imported {}/{} records in {:.1}s ({:.0} records/s); report at {}",
        summary.imported,
        summary.total_records,
        summary.duration_seconds,
        summary.records_per_second,
        report_path.display()
    );
    if !summary.succeeded() {
        bail!(
            "import completed with problems: {} failed records, validation {:?}",
            summary.failed,
            summary.validation
        );
    }
    Ok(())
}

async fn handle_check(config: &AppConfig, args: CheckArgs) -> Result<()> {
    let csv = CsvStore::new(args.csv.unwrap_or_else(|| config.csv_path.clone()));

    if args.csv_only {
        let report = csv.verify_integrity()?;
        let report_path = write_json_report(&config.report_dir, "csv_integrity", &report)?;
        println!(
            "CSV integrity: {} rows, {} duplicates, {} parse errors; report at {}",
            report.row_count,
            report.duplicate_row_ids.len(),
            report.parse_errors.len(),
            report_path.display()
        );
        if !report.is_valid() {
            bail!("CSV integrity check failed");
        }
        return Ok(());
    }

    let pool = db::connect(&config.database, &config.database_url())
        .await
        .context("could not connect to the database")?;
    let store = DbStore::new(pool);
    let report = check_consistency(&store, &csv, args.sample).await?;
    let report_path = write_json_report(&config.report_dir, "consistency_report", &report)?;

    println!(
        "Compared {} records: {} matched, {} mismatched, {} missing in DB, {} missing in CSV",
        report.compared,
        report.matched,
        report.mismatched.len(),
        report.missing_in_db.len(),
        report.missing_in_csv.len()
    );
    for row_id in report.missing_in_db.iter().take(PRINT_DETAIL_CAP) {
        println!("  row {row_id}: present in CSV, missing in database");
    }
    for row_id in report.missing_in_csv.iter().take(PRINT_DETAIL_CAP) {
        println!("  row {row_id}: present in database, missing in CSV");
    }
    for mismatch in report.mismatched.iter().take(PRINT_DETAIL_CAP) {
        let fields: Vec<&str> = mismatch.fields.iter().map(|f| f.field.as_str()).collect();
        println!("  row {}: differs on {}", mismatch.row_id, fields.join(", "));
    }
    if report.discrepancy_count() > PRINT_DETAIL_CAP {
        println!("  ... full detail in {}", report_path.display());
    }

    if !report.is_consistent() {
        bail!(
            "consistency check found {} discrepancies",
            report.discrepancy_count()
        );
    }
    println!("Stores are consistent.");
    Ok(())
}

async fn handle_record(config: &AppConfig, args: RecordArgs) -> Result<()> {
    let mut manager = build_manager(config).await?;
    let fetched = if args.force_csv {
        let records = manager.read_all(true).await?;
        let value = records
            .value
            .into_iter()
            .find(|record| record.row_id == args.row_id);
        println!("Source: csv (forced)");
        value
    } else {
        let fetched = manager.get_record(args.row_id).await?;
        match fetched.source {
            Source::Database => println!("Source: database"),
            Source::Csv => println!("Source: csv"),
        }
        if let Some(event) = &fetched.fallback {
            warn!(reason = %event.reason, "read was served by fallback");
            println!("Fallback: {} ({})", event.operation, event.reason);
        }
        fetched.value
    };

    match fetched {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("row {} not found in either store", args.row_id),
    }
    Ok(())
}

async fn handle_count(config: &AppConfig, args: CountArgs) -> Result<()> {
    let mut manager = build_manager(config).await?;
    match args.processed {
        Some(processed) => {
            let fetched = manager.filter_by_processed(processed).await?;
            println!(
                "{} records with processed={processed} (source: {:?})",
                fetched.value.len(),
                fetched.source
            );
        }
        None => {
            let fetched = manager.count_records().await?;
            println!("{} records (source: {:?})", fetched.value, fetched.source);
        }
    }
    Ok(())
}

async fn handle_pipeline(config: &AppConfig, args: PipelineArgs) -> Result<()> {
    if args.status {
        return match latest_checkpoint(&config.report_dir)? {
            Some(path) => {
                let state = load_checkpoint(&path)?;
                println!("Checkpoint: {}", path.display());
                for stage in &state.stages {
                    println!("  {:10} {:?}", stage.stage.name(), stage.status);
                    if let Some(error) = &stage.error {
                        println!("             {error}");
                    }
                }
                Ok(())
            }
            None => {
                println!("No pipeline checkpoint found.");
                Ok(())
            }
        };
    }

    let outcome = run_pipeline(
        config,
        &PipelineOptions {
            resume: args.resume,
            dry_run: args.dry_run,
        },
    )
    .await?;

    if args.dry_run {
        return Ok(());
    }
    if outcome.state.is_complete() {
        info!("pipeline completed");
        println!("Pipeline completed successfully.");
        Ok(())
    } else {
        let failed: Vec<&str> = outcome
            .state
            .stages
            .iter()
            .filter(|stage| stage.error.is_some())
            .map(|stage| stage.stage.name())
            .collect();
        bail!(
            "pipeline stopped at stage(s): {}; resume with --resume",
            failed.join(", ")
        );
    }
}

/// The dual-write manager used by the single-record tools, with post-write
/// validation enabled. A dead database is fine here: the lazy pool defers
/// the failure and reads fall back to the CSV.
async fn build_manager(config: &AppConfig) -> Result<DualWriteManager> {
    let pool = db::connect_lazy(
        &config.database_url(),
        std::time::Duration::from_secs(config.database.acquire_timeout_secs),
    )?;
    let csv = CsvStore::new(&config.csv_path);
    Ok(DualWriteManager::new(DbStore::new(pool), csv, true))
}
