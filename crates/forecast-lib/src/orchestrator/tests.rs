//! Orchestration against an in-memory store and a temporary artifact root

use super::*;
use crate::config::{CandidateRanges, OrderRange, RetryPolicy, SearchConfig};
use crate::ingest::InMemoryStore;
use crate::models::{MetricPoint, SAMPLE_INTERVAL_SECS};
use crate::recorder::NoopRecorder;
use crate::ErrorKind;
use tempfile::TempDir;

const DAY: i64 = 24 * 60 * 60;
const END: i64 = 1_704_067_200 + 2 * DAY;

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        metrics: vec!["cpu".to_string(), "memory".to_string()],
        candidate_ranges: CandidateRanges {
            p: OrderRange::new(0, 1),
            d: OrderRange::new(0, 0),
            q: OrderRange::new(0, 1),
            seasonal_p: OrderRange::new(0, 0),
            seasonal_d: OrderRange::new(0, 1),
            seasonal_q: OrderRange::new(0, 0),
            max_total_differencing: 1,
        },
        min_history_cycles: 10,
        search: SearchConfig {
            workers: 2,
            timeout_secs: 120,
            max_iterations: 400,
            tolerance: 1e-8,
            plausibility_screen: true,
        },
        retry_policy: RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            attempt_timeout_secs: 5,
        },
        artifact_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn history(end: i64, count: i64) -> Vec<MetricPoint> {
    (1..=count)
        .map(|i| {
            let ts = end - i * SAMPLE_INTERVAL_SECS;
            let phase = ((ts / SAMPLE_INTERVAL_SECS) % 12) as f64 / 12.0 * std::f64::consts::TAU;
            let wobble = ((ts / SAMPLE_INTERVAL_SECS) % 7) as f64 * 0.3;
            MetricPoint::new(ts, 50.0 + 8.0 * phase.sin() + wobble)
        })
        .collect()
}

async fn orchestrator(dir: &TempDir, store: Arc<InMemoryStore>) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        config(dir),
        store,
        Arc::new(NoopRecorder),
        PipelineMetrics::new().unwrap(),
    )
}

fn request(command: PipelineCommand, metrics: &[&str]) -> RunRequest {
    RunRequest {
        command,
        run_id: "20240103T000000Z".to_string(),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        window: TimeWindow::new(END - DAY, END),
        force: false,
    }
}

#[tokio::test]
async fn test_partial_success_keeps_metrics_independent() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert("cpu", history(END, 288)).await;
    store.insert("memory", history(END, 288)).await;
    store.set_unreachable("memory").await;

    let orchestrator = orchestrator(&dir, store).await;
    let record = orchestrator
        .run(request(PipelineCommand::Full, &["cpu", "memory"]))
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Partial);
    assert_eq!(record.exit_code(), EXIT_PARTIAL);

    let cpu = &record.metrics[0];
    assert_eq!(cpu.state, Stage::Done);
    assert_eq!(cpu.model_version.as_deref(), Some("v20240103T000000Z"));
    assert!(cpu.artifacts.contains(&"forecasts/cpu.csv".to_string()));

    let memory = &record.metrics[1];
    assert_eq!(memory.state, Stage::Failed);
    assert_eq!(memory.failed_stage, Some(Stage::Ingesting));
    assert_eq!(memory.error_kind, Some(ErrorKind::DataUnavailable));

    let artifacts = orchestrator.artifacts();
    assert!(artifacts.exists("runs/20240103T000000Z/run.json").await);
    assert!(artifacts.exists(layout::METRICS_TEXTFILE).await);
    assert!(artifacts.load_forecast("memory").await.unwrap().is_none());
    let prom = std::fs::read_to_string(dir.path().join("metrics.prom")).unwrap();
    assert!(prom.contains("forecast_run_status"));
}

#[tokio::test]
async fn test_stage_commands_chain_through_snapshots() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert("cpu", history(END, 288)).await;
    let orchestrator = orchestrator(&dir, store).await;

    for command in [
        PipelineCommand::Ingest,
        PipelineCommand::Preprocess,
        PipelineCommand::Train,
        PipelineCommand::Infer,
    ] {
        let record = orchestrator.run(request(command, &["cpu"])).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded, "{}", command.as_str());
        assert!(orchestrator
            .artifacts()
            .exists(&layout::run_record("20240103T000000Z", command.as_str()))
            .await);
    }

    let forecast = orchestrator.artifacts().load_forecast("cpu").await.unwrap().unwrap();
    assert_eq!(forecast.points.len(), 48);
    assert_eq!(forecast.points[0].timestamp, END);
}

#[tokio::test]
async fn test_stage_without_input_snapshot_fails() {
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, Arc::new(InMemoryStore::new())).await;

    let record = orchestrator
        .run(request(PipelineCommand::Preprocess, &["cpu"]))
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.metrics[0].error_kind, Some(ErrorKind::DataUnavailable));
    assert_eq!(record.exit_code(), ErrorKind::DataUnavailable.exit_code());

    let infer = orchestrator
        .run(request(PipelineCommand::Infer, &["cpu"]))
        .await
        .unwrap();
    assert_eq!(
        infer.metrics[0].error_kind,
        Some(ErrorKind::ForecastGenerationError)
    );
}

#[tokio::test]
async fn test_rerun_reuses_existing_outputs() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert("cpu", history(END, 288)).await;
    let orchestrator = orchestrator(&dir, store.clone()).await;

    let first = orchestrator
        .run(request(PipelineCommand::Full, &["cpu"]))
        .await
        .unwrap();
    assert!(first.metrics[0].reused.is_empty());
    let forecast = orchestrator.artifacts().load_forecast("cpu").await.unwrap();

    let second = orchestrator
        .run(request(PipelineCommand::Full, &["cpu"]))
        .await
        .unwrap();
    assert_eq!(
        second.metrics[0].reused,
        vec![
            Stage::Ingesting,
            Stage::Preprocessing,
            Stage::Training,
            Stage::Forecasting
        ]
    );
    assert_eq!(store.query_count(), 1);
    assert_eq!(orchestrator.artifacts().load_forecast("cpu").await.unwrap(), forecast);

    let forced = orchestrator
        .run(RunRequest {
            force: true,
            ..request(PipelineCommand::Ingest, &["cpu"])
        })
        .await
        .unwrap();
    assert!(forced.metrics[0].reused.is_empty());
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_rerun_of_older_run_forecasts_with_its_own_model() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert("cpu", history(END, 288)).await;
    let orchestrator = orchestrator(&dir, store).await;

    orchestrator
        .run(request(PipelineCommand::Full, &["cpu"]))
        .await
        .unwrap();
    orchestrator
        .run(RunRequest {
            run_id: "20240103T010000Z".to_string(),
            ..request(PipelineCommand::Full, &["cpu"])
        })
        .await
        .unwrap();
    let latest = orchestrator.artifacts().latest_pointer("cpu").await.unwrap().unwrap();
    assert_eq!(latest.version, "v20240103T010000Z");

    let rerun = orchestrator
        .run(request(PipelineCommand::Full, &["cpu"]))
        .await
        .unwrap();
    let cpu = &rerun.metrics[0];
    assert!(cpu.reused.contains(&Stage::Training));
    assert!(!cpu.reused.contains(&Stage::Forecasting));
    assert_eq!(cpu.model_version.as_deref(), Some("v20240103T000000Z"));

    let forecast = orchestrator.artifacts().load_forecast("cpu").await.unwrap().unwrap();
    assert_eq!(forecast.model_version, "v20240103T000000Z");
}

#[tokio::test]
async fn test_short_window_fails_before_training() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert("cpu", history(END, 288)).await;
    let orchestrator = orchestrator(&dir, store).await;

    let record = orchestrator
        .run(RunRequest {
            window: TimeWindow::new(END - 3600, END),
            ..request(PipelineCommand::Full, &["cpu"])
        })
        .await
        .unwrap();

    let cpu = &record.metrics[0];
    assert_eq!(cpu.error_kind, Some(ErrorKind::InsufficientHistory));
    assert_eq!(cpu.failed_stage, Some(Stage::Ingesting));
    assert!(!orchestrator.artifacts().exists(&layout::models_dir("cpu")).await);
}

#[tokio::test]
async fn test_history_ending_before_window_end_fails_preprocessing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    // last six hours (72 samples) of the one-day window are absent
    store.insert("cpu", history(END - 6 * 3600, 216)).await;
    let orchestrator = orchestrator(&dir, store).await;

    let record = orchestrator
        .run(request(PipelineCommand::Full, &["cpu"]))
        .await
        .unwrap();

    let cpu = &record.metrics[0];
    assert_eq!(cpu.state, Stage::Failed);
    assert_eq!(cpu.failed_stage, Some(Stage::Preprocessing));
    assert_eq!(cpu.error_kind, Some(ErrorKind::InsufficientHistory));
    assert!(orchestrator.artifacts().load_forecast("cpu").await.unwrap().is_none());
    assert!(!orchestrator.artifacts().exists(&layout::models_dir("cpu")).await);
}

#[tokio::test]
async fn test_invalid_metric_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, Arc::new(InMemoryStore::new())).await;
    let err = orchestrator
        .run(request(PipelineCommand::Full, &["../etc"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_command_stages() {
    assert_eq!(PipelineCommand::Full.stages().len(), 4);
    assert_eq!(PipelineCommand::Infer.stages(), &[Stage::Forecasting]);
    assert_eq!(PipelineCommand::Full.as_str(), "run");
}
