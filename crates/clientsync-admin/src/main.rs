use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use clientsync_core::archive::{archive_csv_files, verify_archive, ArchiveOptions};
use clientsync_core::benchmark::run_benchmark;
use clientsync_core::config::AppConfig;
use clientsync_core::csv_store::CsvStore;
use clientsync_core::db::{self, DbStore};
use clientsync_core::drill::run_fallback_drill;
use clientsync_core::dual_write::DualWriteManager;
use clientsync_core::monitor::{run_monitor, MonitorOptions};
use clientsync_core::report::write_json_report;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Typing-clients migration operations tooling", long_about = None)]
struct Cli {
    /// Path to a clientsync.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive CSV files with SHA-256 verification once the database is authoritative
    Archive(ArchiveArgs),
    /// Benchmark CSV whole-file writes against database upserts
    Benchmark(BenchmarkArgs),
    /// Run the bounded-duration dual-write health monitor
    Monitor(MonitorArgs),
    /// Simulate a database outage and verify the CSV fallback path
    FallbackDrill(DrillArgs),
}

#[derive(Args, Debug)]
struct ArchiveArgs {
    /// Directory scanned for backup and output CSVs (defaults to the
    /// configured CSV's directory)
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// Root directory for the timestamped archive
    #[arg(long, default_value = "archive")]
    archive_root: PathBuf,
    /// Delete originals after a fully verified archive
    #[arg(long)]
    delete_originals: bool,
    /// Verify an existing archive directory instead of creating one
    #[arg(long)]
    verify: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BenchmarkArgs {
    /// Comma-separated record counts to benchmark
    #[arg(long, default_value = "10,50,100", value_delimiter = ',')]
    counts: Vec<usize>,
    /// Timing iterations per count
    #[arg(long, default_value_t = 3)]
    iterations: usize,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Total monitoring duration in seconds
    #[arg(long, default_value_t = 300)]
    duration: u64,
    /// Seconds between check cycles
    #[arg(long, default_value_t = 30)]
    check_interval: u64,
}

#[derive(Args, Debug)]
struct DrillArgs {
    /// CSV file to drill against (defaults to the configured path)
    #[arg(long)]
    csv: Option<PathBuf>,
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
        Command::Archive(args) => handle_archive(&config, args).await,
        Command::Benchmark(args) => handle_benchmark(&config, args).await,
        Command::Monitor(args) => handle_monitor(&config, args).await,
        Command::FallbackDrill(args) => handle_drill(&config, args).await,
    }
}

async fn handle_archive(config: &AppConfig, args: ArchiveArgs) -> Result<()> {
    if let Some(archive_dir) = args.verify {
        let report = verify_archive(&archive_dir)?;
        println!(
            "Verified {} of {} archived files in {}",
            report.ok, report.checked, report.archive_dir
        );
        for failure in &report.failures {
            println!("  FAILED: {failure}");
        }
        if !report.all_ok() {
            bail!("archive verification failed");
        }
        return Ok(());
    }

    let source_dir = args.source_dir.unwrap_or_else(|| {
        config
            .csv_path
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let options = ArchiveOptions {
        primary_csv: config.csv_path.clone(),
        source_dir,
        archive_root: args.archive_root,
        delete_originals: args.delete_originals,
    };
    let manifest = archive_csv_files(&options)?;
    record_archive_state(config, &manifest.archive_dir, manifest.all_verified).await;

    println!(
        "Archived {} files ({} bytes) to {}; verified: {}",
        manifest.files.len(),
        manifest.total_bytes,
        manifest.archive_dir,
        manifest.all_verified
    );
    if !manifest.all_verified {
        bail!("archive checksum verification failed");
    }
    Ok(())
}

/// Archive bookkeeping in `migration_state` is best-effort: archiving often
/// runs when the database is the only store left, but must also work when it
/// is not reachable.
async fn record_archive_state(config: &AppConfig, archive_dir: &str, verified: bool) {
    match db::connect(&config.database, &config.database_url()).await {
        Ok(pool) => {
            let status = if verified { "completed" } else { "failed" };
            let store = DbStore::new(pool);
            if let Err(err) = store
                .record_state(
                    "csv_archive",
                    Some(&config.csv_path.display().to_string()),
                    Some(archive_dir),
                    status,
                    None,
                )
                .await
            {
                warn!(error = %err, "could not record archive state");
            }
        }
        Err(err) => warn!(error = %err, "database unreachable; archive state not recorded"),
    }
}

async fn handle_benchmark(config: &AppConfig, args: BenchmarkArgs) -> Result<()> {
    let pool = db::connect(&config.database, &config.database_url())
        .await
        .context("benchmark needs a reachable database")?;
    db::run_migrations(&pool).await?;
    let store = DbStore::new(pool);

    let work_dir = std::env::temp_dir();
    let report = run_benchmark(&store, &work_dir, &args.counts, args.iterations).await?;
    let report_path = write_json_report(&config.report_dir, "benchmark", &report)?;

    for entry in &report.entries {
        println!(
            "{:>6} records: csv {:.4}s ({:.0}/s), db {:.4}s ({:.0}/s), db speedup {:.2}x",
            entry.record_count,
            entry.csv_write_seconds,
            entry.csv_records_per_second,
            entry.db_upsert_seconds,
            entry.db_records_per_second,
            entry.db_speedup
        );
    }
    println!("Report at {}", report_path.display());
    Ok(())
}

async fn handle_monitor(config: &AppConfig, args: MonitorArgs) -> Result<()> {
    let pool = db::connect_lazy(
        &config.database_url(),
        Duration::from_secs(config.database.acquire_timeout_secs),
    )?;
    let csv = CsvStore::new(&config.csv_path);
    let mut manager = DualWriteManager::new(DbStore::new(pool), csv, false);

    let options = MonitorOptions {
        duration: Duration::from_secs(args.duration),
        check_interval: Duration::from_secs(args.check_interval),
    };
    let report = run_monitor(&mut manager, &config.report_dir, &options).await?;

    println!(
        "Monitoring finished: {} cycles, {} checks, {} failed, {} alerts",
        report.cycles,
        report.checks_run,
        report.checks_failed,
        report.alerts.len()
    );
    if report.checks_failed > 0 {
        bail!("monitoring observed failing health checks");
    }
    Ok(())
}

async fn handle_drill(config: &AppConfig, args: DrillArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(csv) = args.csv {
        config.csv_path = csv;
    }

    let report = run_fallback_drill(&config).await?;
    let report_path = write_json_report(&config.report_dir, "fallback_drill", &report)?;

    for check in &report.checks {
        let marker = if check.passed { "ok " } else { "FAIL" };
        println!("[{marker}] {}: {}", check.name, check.detail);
    }
    println!("Report at {}", report_path.display());
    if !report.passed() {
        bail!("fallback drill failed");
    }
    info!("fallback drill passed");
    Ok(())
}
