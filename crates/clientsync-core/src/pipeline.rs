// crates/clientsync-core/src/pipeline.rs
//
// Sequential stage orchestrator with a JSON checkpoint file for crude
// resumability: re-run with --resume and execution picks up at the first
// stage that is not yet completed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::csv_store::CsvStore;
use crate::db::{self, DbStore};
use crate::import::{import_csv, ImportOptions};
use crate::report::timestamp_slug;
use crate::validator::validate_full_migration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    Import,
    Validate,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Schema, Stage::Import, Stage::Validate];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Import => "import",
            Stage::Validate => "validate",
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Stage::Schema => Duration::from_secs(60),
            Stage::Import => Duration::from_secs(600),
            Stage::Validate => Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub pipeline_run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageState>,
}

impl PipelineState {
    fn new() -> Self {
        PipelineState {
            pipeline_run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageState {
                    stage,
                    status: StageStatus::Pending,
                    started_at: None,
                    completed_at: None,
                    error: None,
                })
                .collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.status == StageStatus::Completed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub resume: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    /// Present only when the run stopped early; removed on success.
    pub checkpoint: Option<PathBuf>,
}

/// Saves the checkpoint after every stage transition.
pub fn save_checkpoint(dir: &Path, state: &PipelineState) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "pipeline_state_{}_{}.json",
        state.pipeline_run_id.simple(),
        timestamp_slug(state.started_at)
    ));
    fs::write(&path, serde_json::to_string_pretty(state)?)
        .with_context(|| format!("writing checkpoint {}", path.display()))?;
    Ok(path)
}

/// The most recently written checkpoint file in `dir`.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = dir.join("pipeline_state_*.json");
    let Some(pattern_str) = pattern.to_str() else {
        return Ok(None);
    };
    let mut paths: Vec<PathBuf> = glob::glob(pattern_str)
        .context("bad checkpoint glob pattern")?
        .filter_map(|entry| entry.ok())
        .collect();
    paths.sort_by_key(|path| {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    Ok(paths.pop())
}

pub fn load_checkpoint(path: &Path) -> Result<PipelineState> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading checkpoint {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing checkpoint {}", path.display()))
}

/// Runs the named stages sequentially with fixed per-stage timeouts. With
/// `resume`, completed stages from the latest checkpoint are skipped; on a
/// fully successful run the checkpoint files for this run are removed.
pub async fn run_pipeline(config: &AppConfig, options: &PipelineOptions) -> Result<PipelineOutcome> {
    if options.dry_run {
        let state = PipelineState::new();
        for stage in &state.stages {
            println!(
                "would run stage '{}' (timeout {}s)",
                stage.stage.name(),
                stage.stage.timeout().as_secs()
            );
        }
        return Ok(PipelineOutcome {
            state,
            checkpoint: None,
        });
    }

    let mut state = if options.resume {
        match latest_checkpoint(&config.report_dir)? {
            Some(path) => {
                let state = load_checkpoint(&path)?;
                info!(checkpoint = %path.display(), "resuming from checkpoint");
                state
            }
            None => {
                info!("no checkpoint found; starting from the beginning");
                PipelineState::new()
            }
        }
    } else {
        PipelineState::new()
    };

    let mut checkpoint = save_checkpoint(&config.report_dir, &state)?;

    for index in 0..state.stages.len() {
        if state.stages[index].status == StageStatus::Completed {
            info!(stage = state.stages[index].stage.name(), "stage already completed; skipping");
            continue;
        }
        let stage = state.stages[index].stage;
        state.stages[index].status = StageStatus::Running;
        state.stages[index].started_at = Some(Utc::now());
        state.stages[index].error = None;
        state.updated_at = Utc::now();
        save_checkpoint(&config.report_dir, &state)?;

        info!(stage = stage.name(), "running pipeline stage");
        let result = timeout(stage.timeout(), execute_stage(stage, config)).await;
        let outcome = match result {
            Ok(inner) => inner,
            Err(_) => Err(anyhow::anyhow!(
                "stage '{}' timed out after {}s",
                stage.name(),
                stage.timeout().as_secs()
            )),
        };

        match outcome {
            Ok(()) => {
                state.stages[index].status = StageStatus::Completed;
                state.stages[index].completed_at = Some(Utc::now());
                state.updated_at = Utc::now();
                checkpoint = save_checkpoint(&config.report_dir, &state)?;
            }
            Err(err) => {
                error!(stage = stage.name(), error = %err, "pipeline stage failed");
                state.stages[index].status = StageStatus::Failed;
                state.stages[index].error = Some(err.to_string());
                state.updated_at = Utc::now();
                let checkpoint = save_checkpoint(&config.report_dir, &state)?;
                return Ok(PipelineOutcome {
                    state,
                    checkpoint: Some(checkpoint),
                });
            }
        }
    }

    if state.is_complete() {
        remove_run_checkpoints(&config.report_dir, &state)?;
        info!(run_id = %state.pipeline_run_id, "pipeline completed; checkpoint removed");
        return Ok(PipelineOutcome {
            state,
            checkpoint: None,
        });
    }
    Ok(PipelineOutcome {
        state,
        checkpoint: Some(checkpoint),
    })
}

async fn execute_stage(stage: Stage, config: &AppConfig) -> Result<()> {
    let pool = db::connect(&config.database, &config.database_url()).await?;
    let store = DbStore::new(pool.clone());
    match stage {
        Stage::Schema => {
            db::run_migrations(&pool).await?;
            let missing = store.missing_tables().await?;
            if !missing.is_empty() {
                bail!("schema stage left tables missing: {}", missing.join(", "));
            }
        }
        Stage::Import => {
            let csv = CsvStore::new(&config.csv_path);
            let summary = import_csv(&store, &csv, &ImportOptions::default()).await?;
            if !summary.succeeded() {
                bail!(
                    "import finished with {} failures out of {}",
                    summary.failed,
                    summary.total_records
                );
            }
        }
        Stage::Validate => {
            let csv = CsvStore::new(&config.csv_path);
            validate_full_migration(&store, &csv).await?;
        }
    }
    Ok(())
}

fn remove_run_checkpoints(dir: &Path, state: &PipelineState) -> Result<()> {
    let pattern = dir.join(format!(
        "pipeline_state_{}_*.json",
        state.pipeline_run_id.simple()
    ));
    if let Some(pattern_str) = pattern.to_str() {
        for entry in glob::glob(pattern_str).context("bad checkpoint glob pattern")? {
            if let Ok(path) = entry {
                let _ = fs::remove_file(path);
            }
        }
    }
    Ok(())
}
