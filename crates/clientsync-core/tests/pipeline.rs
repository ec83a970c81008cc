use tempfile::TempDir;

use clientsync_core::pipeline::{
    latest_checkpoint, load_checkpoint, run_pipeline, save_checkpoint, PipelineOptions,
    PipelineState, Stage, StageStatus,
};

fn fresh_state() -> PipelineState {
    // Round-trip through the dry-run path to get a state without reaching
    // into private constructors.
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = clientsync_core::config::AppConfig::default();
    rt.block_on(run_pipeline(
        &config,
        &PipelineOptions {
            resume: false,
            dry_run: true,
        },
    ))
    .unwrap()
    .state
}

#[test]
fn checkpoint_round_trips() {
    let dir = TempDir::new().unwrap();
    let mut state = fresh_state();
    state.stages[0].status = StageStatus::Completed;

    let path = save_checkpoint(dir.path(), &state).unwrap();
    let loaded = load_checkpoint(&path).unwrap();
    assert_eq!(loaded.pipeline_run_id, state.pipeline_run_id);
    assert_eq!(loaded.stages.len(), 3);
    assert_eq!(loaded.stages[0].stage, Stage::Schema);
    assert_eq!(loaded.stages[0].status, StageStatus::Completed);
    assert_eq!(loaded.stages[1].status, StageStatus::Pending);
}

#[test]
fn latest_checkpoint_prefers_the_most_recent_write() {
    let dir = TempDir::new().unwrap();
    let older = fresh_state();
    save_checkpoint(dir.path(), &older).unwrap();

    // Ensure a distinct modification time on coarse-grained filesystems.
    std::thread::sleep(std::time::Duration::from_millis(20));
    let newer = fresh_state();
    let newer_path = save_checkpoint(dir.path(), &newer).unwrap();

    let found = latest_checkpoint(dir.path()).unwrap().unwrap();
    assert_eq!(found, newer_path);
    let loaded = load_checkpoint(&found).unwrap();
    assert_eq!(loaded.pipeline_run_id, newer.pipeline_run_id);
}

#[test]
fn no_checkpoint_means_none() {
    let dir = TempDir::new().unwrap();
    assert!(latest_checkpoint(dir.path()).unwrap().is_none());
}

#[tokio::test]
async fn dry_run_lists_stages_without_touching_the_database() {
    let config = clientsync_core::config::AppConfig::default();
    let outcome = run_pipeline(
        &config,
        &PipelineOptions {
            resume: false,
            dry_run: true,
        },
    )
    .await
    .unwrap();
    assert!(outcome.checkpoint.is_none());
    assert_eq!(outcome.state.stages.len(), 3);
    assert!(outcome
        .state
        .stages
        .iter()
        .all(|stage| stage.status == StageStatus::Pending));
}
