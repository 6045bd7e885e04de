//! End-to-end runs of the pipeline binary against a CSV history file

use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const END: &str = "2024-01-03T00:00:00Z";
const END_TS: i64 = 1_704_240_000;
const STEP: i64 = 300;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// `cpu` and `memory` columns for `rows` samples before END
    fn new(rows: i64, cpu: impl Fn(i64) -> Option<f64>, memory: impl Fn(i64) -> Option<f64>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("timestamp,cpu,memory\n");
        for i in (1..=rows).rev() {
            let ts = END_TS - i * STEP;
            let cell = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_default();
            writeln!(csv, "{},{},{}", ts, cell(cpu(ts)), cell(memory(ts))).unwrap();
        }
        std::fs::write(dir.path().join("history.csv"), csv).unwrap();

        let root = dir.path().display().to_string();
        let config = format!(
            r#"
metrics = ["cpu", "memory"]
history_days = 1
min_history_cycles = 10
artifact_dir = "{root}/artifacts"

[candidate_ranges]
p = {{ min = 0, max = 1 }}
d = {{ min = 0, max = 0 }}
q = {{ min = 0, max = 1 }}
seasonal_p = {{ min = 0, max = 0 }}
seasonal_d = {{ min = 0, max = 1 }}
seasonal_q = {{ min = 0, max = 0 }}
max_total_differencing = 1

[search]
workers = 2
timeout_secs = 120
max_iterations = 400

[retry_policy]
max_attempts = 1
initial_backoff_ms = 1
max_backoff_ms = 1
attempt_timeout_secs = 5

[store]
kind = "csv"
path = "{root}/history.csv"

[recorder]
kind = "file"
root = "{root}/mlruns"
"#
        );
        std::fs::write(dir.path().join("forecast.toml"), config).unwrap();
        Self { dir }
    }

    fn artifacts(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_forecast-pipeline"))
            .args(args)
            .arg("--config")
            .arg(self.dir.path().join("forecast.toml"))
            .env("RUST_LOG", "warn")
            .current_dir(self.dir.path())
            .output()
            .unwrap()
    }
}

fn seasonal(ts: i64) -> Option<f64> {
    let slot = ts / STEP;
    let phase = (slot % 12) as f64 / 12.0 * std::f64::consts::TAU;
    Some(45.0 + 9.0 * phase.sin() + (slot % 5) as f64 * 0.4)
}

fn record(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not a run record ({}): {}",
            e,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn test_partial_success_exits_with_partial_status() {
    let ws = Workspace::new(288, seasonal, |_| None);
    let output = ws.run(&["run", "--end", END, "--run-id", "r1"]);

    assert_eq!(output.status.code(), Some(8));
    let record = record(&output);
    assert_eq!(record["status"], "partial");
    assert_eq!(record["metrics"][0]["metric"], "cpu");
    assert_eq!(record["metrics"][0]["state"], "done");
    assert_eq!(record["metrics"][1]["state"], "failed");
    assert_eq!(record["metrics"][1]["error_kind"], "data_unavailable");

    let artifacts = ws.artifacts();
    assert_eq!(line_count(&artifacts.join("forecasts/cpu.csv")), 49);
    assert!(!artifacts.join("forecasts/memory.csv").exists());
    assert!(artifacts.join("runs/r1/run.json").exists());
    assert!(artifacts.join("snapshots/cpu/r1/preprocessed.csv").exists());
    assert!(artifacts.join("metrics.prom").exists());
}

#[test]
fn test_inference_is_repeatable() {
    let ws = Workspace::new(288, seasonal, seasonal);
    let output = ws.run(&["run", "--end", END, "--run-id", "r1", "--metric", "cpu"]);
    assert_eq!(output.status.code(), Some(0));
    let forecast = std::fs::read_to_string(ws.artifacts().join("forecasts/cpu.csv")).unwrap();

    let again = ws.run(&["infer", "--run-id", "r2", "--metric", "cpu", "--force"]);
    assert_eq!(again.status.code(), Some(0));
    let repeated = std::fs::read_to_string(ws.artifacts().join("forecasts/cpu.csv")).unwrap();
    assert_eq!(forecast, repeated);
    assert!(forecast.starts_with("timestamp,forecast,lower_bound,upper_bound\n2024-01-03T00:00:00Z,"));
}

#[test]
fn test_short_history_fails_before_fitting() {
    // six hours of data inside a one-day window
    let ws = Workspace::new(72, seasonal, seasonal);
    let output = ws.run(&["run", "--end", END, "--run-id", "r1", "--metric", "cpu"]);

    assert_eq!(output.status.code(), Some(4));
    let record = record(&output);
    assert_eq!(record["metrics"][0]["error_kind"], "insufficient_history");
    assert_eq!(record["metrics"][0]["failed_stage"], "training");
    assert!(!ws.artifacts().join("models/cpu").exists());
    assert!(!ws.dir.path().join("mlruns/cpu").exists());
}

#[test]
fn test_no_converged_candidate_writes_no_model() {
    let ws = Workspace::new(288, |_| Some(42.0), seasonal);
    let output = ws.run(&["run", "--end", END, "--run-id", "r1", "--metric", "cpu"]);

    assert_eq!(output.status.code(), Some(5));
    assert!(!ws.artifacts().join("models/cpu").exists());
    assert!(!ws.artifacts().join("forecasts/cpu.csv").exists());
}

#[test]
fn test_stage_commands_share_a_run_id() {
    let ws = Workspace::new(288, seasonal, seasonal);
    for command in ["ingest", "preprocess", "train", "infer"] {
        let output = ws.run(&[command, "--end", END, "--run-id", "r7", "--metric", "memory"]);
        assert_eq!(
            output.status.code(),
            Some(0),
            "{} failed: {}",
            command,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    assert!(ws.artifacts().join("models/memory/vr7.json").exists());
    assert_eq!(line_count(&ws.artifacts().join("forecasts/memory.csv")), 49);
}

#[test]
fn test_invalid_configuration_exit_status() {
    let ws = Workspace::new(288, seasonal, seasonal);
    let output = Command::new(env!("CARGO_BIN_EXE_forecast-pipeline"))
        .args(["run", "--config"])
        .arg(ws.dir.path().join("missing.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let output = ws.run(&["run", "--history-days", "0"]);
    assert_eq!(output.status.code(), Some(2));
}
