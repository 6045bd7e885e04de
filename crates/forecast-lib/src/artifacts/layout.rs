//! Relative keys of every artifact under the store root

use serde::{Deserialize, Serialize};

pub const METRICS_TEXTFILE: &str = "metrics.prom";
pub const LATEST_POINTER: &str = "latest.json";

/// Which stage produced a series snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Raw,
    Preprocessed,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Raw => "raw",
            SnapshotKind::Preprocessed => "preprocessed",
        }
    }
}

pub fn models_dir(metric: &str) -> String {
    format!("models/{}", metric)
}

pub fn model(metric: &str, version: &str) -> String {
    format!("models/{}/{}.json", metric, version)
}

pub fn model_summary(metric: &str, version: &str) -> String {
    format!("models/{}/{}.summary.txt", metric, version)
}

pub fn model_pointer(metric: &str) -> String {
    format!("models/{}/{}", metric, LATEST_POINTER)
}

pub fn forecast(metric: &str) -> String {
    format!("forecasts/{}.csv", metric)
}

pub fn forecast_meta(metric: &str) -> String {
    format!("forecasts/{}.meta.json", metric)
}

pub fn snapshot(metric: &str, run_id: &str, kind: SnapshotKind) -> String {
    format!("snapshots/{}/{}/{}.csv", metric, run_id, kind.as_str())
}

pub fn run_record(run_id: &str, command: &str) -> String {
    format!("runs/{}/{}.json", run_id, command)
}

/// Whether a metric name or run id is safe to use as a single path segment
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
