// crates/clientsync-core/src/monitor.rs
//
// Bounded-duration health loop over the dual-write path. Not a daemon: it
// runs its checks on an interval, writes periodic reports, and exits at the
// deadline.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dual_write::{DualWriteManager, MetricsSnapshot, Source};
use crate::report::write_json_report;

/// Fallback rate (percent) above which an alert is raised.
const ALERT_FALLBACK_RATE: f64 = 10.0;
/// Response time above which a single check raises an alert.
const ALERT_RESPONSE_MS: u128 = 5_000;
/// A performance probe runs every this many cycles.
const PROBE_EVERY: u64 = 5;
/// An intermediate report is written every this many cycles.
const REPORT_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub duration: Duration,
    pub check_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub ok: bool,
    pub response_ms: u128,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub at: DateTime<Utc>,
    pub condition: String,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct MonitorReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles: u64,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub alerts: Vec<Alert>,
    pub metrics: MetricsSnapshot,
}

/// Runs the health loop until the deadline, writing reports under
/// `<report_dir>/monitoring_reports/`. Returns the final report.
pub async fn run_monitor(
    manager: &mut DualWriteManager,
    report_dir: &Path,
    options: &MonitorOptions,
) -> Result<MonitorReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let deadline = Instant::now() + options.duration;
    let monitor_dir = report_dir.join("monitoring_reports");

    // Pick a probe row up front; the CSV copy is the cheap place to look.
    let probe_row_id = manager
        .csv()
        .read()
        .ok()
        .and_then(|records| records.first().map(|record| record.row_id));

    let mut cycles = 0u64;
    let mut checks_run = 0usize;
    let mut checks_failed = 0usize;
    let mut alerts: Vec<Alert> = Vec::new();

    info!(%run_id, duration_secs = options.duration.as_secs(), "monitoring started");
    loop {
        cycles += 1;
        let mut cycle_checks = Vec::new();

        cycle_checks.push(check_connectivity(manager).await);
        if let Some(row_id) = probe_row_id {
            cycle_checks.push(check_record_read(manager, row_id).await);
        }
        cycle_checks.push(check_csv_fallback(manager).await);
        if cycles % PROBE_EVERY == 0 {
            cycle_checks.push(probe_full_read(manager).await);
        }

        for check in &cycle_checks {
            checks_run += 1;
            if !check.ok {
                checks_failed += 1;
                alerts.push(alert("check_failed", format!("{}: {}", check.name, check.detail)));
            } else if check.response_ms > ALERT_RESPONSE_MS {
                alerts.push(alert(
                    "slow_response",
                    format!("{} took {}ms", check.name, check.response_ms),
                ));
            }
        }

        let metrics = manager.metrics();
        if metrics.fallback_rate > ALERT_FALLBACK_RATE {
            alerts.push(alert(
                "fallback_rate",
                format!("fallback rate at {:.1}%", metrics.fallback_rate),
            ));
        }

        if cycles % REPORT_EVERY == 0 {
            let interim = MonitorReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                cycles,
                checks_run,
                checks_failed,
                alerts: alerts.clone(),
                metrics,
            };
            if let Err(err) = write_json_report(&monitor_dir, "monitor_interim", &interim) {
                warn!(error = %err, "could not write interim monitoring report");
            }
        }

        if Instant::now() >= deadline {
            break;
        }
        sleep(options.check_interval).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    let report = MonitorReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        cycles,
        checks_run,
        checks_failed,
        alerts,
        metrics: manager.metrics(),
    };
    write_json_report(&monitor_dir, "monitor_final", &report)?;
    info!(
        cycles = report.cycles,
        failed = report.checks_failed,
        alerts = report.alerts.len(),
        "monitoring finished"
    );
    Ok(report)
}

async fn check_connectivity(manager: &mut DualWriteManager) -> HealthCheck {
    let started = Instant::now();
    match manager.db().count().await {
        Ok(count) => HealthCheck {
            name: "database_connectivity".to_string(),
            ok: true,
            response_ms: started.elapsed().as_millis(),
            detail: format!("{count} records"),
        },
        Err(err) => HealthCheck {
            name: "database_connectivity".to_string(),
            ok: false,
            response_ms: started.elapsed().as_millis(),
            detail: err.to_string(),
        },
    }
}

async fn check_record_read(manager: &mut DualWriteManager, row_id: i64) -> HealthCheck {
    let started = Instant::now();
    match manager.get_record(row_id).await {
        Ok(fetched) => HealthCheck {
            name: "record_read".to_string(),
            ok: fetched.value.is_some(),
            response_ms: started.elapsed().as_millis(),
            detail: match fetched.source {
                Source::Database => format!("row {row_id} served by database"),
                Source::Csv => format!("row {row_id} served by CSV fallback"),
            },
        },
        Err(err) => HealthCheck {
            name: "record_read".to_string(),
            ok: false,
            response_ms: started.elapsed().as_millis(),
            detail: err.to_string(),
        },
    }
}

async fn check_csv_fallback(manager: &mut DualWriteManager) -> HealthCheck {
    let started = Instant::now();
    match manager.read_all(true).await {
        Ok(fetched) => HealthCheck {
            name: "csv_fallback_path".to_string(),
            ok: true,
            response_ms: started.elapsed().as_millis(),
            detail: format!("{} rows readable from CSV", fetched.value.len()),
        },
        Err(err) => HealthCheck {
            name: "csv_fallback_path".to_string(),
            ok: false,
            response_ms: started.elapsed().as_millis(),
            detail: err.to_string(),
        },
    }
}

async fn probe_full_read(manager: &mut DualWriteManager) -> HealthCheck {
    let started = Instant::now();
    match manager.read_all(false).await {
        Ok(fetched) => HealthCheck {
            name: "full_read_probe".to_string(),
            ok: true,
            response_ms: started.elapsed().as_millis(),
            detail: format!("{} rows in {}ms", fetched.value.len(), started.elapsed().as_millis()),
        },
        Err(err) => HealthCheck {
            name: "full_read_probe".to_string(),
            ok: false,
            response_ms: started.elapsed().as_millis(),
            detail: err.to_string(),
        },
    }
}

fn alert(condition: &str, detail: String) -> Alert {
    warn!(condition, %detail, "monitoring alert");
    Alert {
        at: Utc::now(),
        condition: condition.to_string(),
        detail,
    }
}
