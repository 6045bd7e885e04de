//! Experiment recording
//!
//! The pipeline is the only writer. Recorders are append-only: a run that
//! never reaches `end_run` stays visibly incomplete instead of touching
//! earlier runs.

mod file;
mod mlflow;

pub use file::FileRecorder;
pub use mlflow::MlflowRecorder;

use crate::config::{RecorderConfig, RetryPolicy};
use crate::error::{PipelineError, Result};
use crate::retry::retry_with_backoff;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use async_trait::async_trait;

/// Terminal (or current) state of a recorded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Running,
    Finished,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Running => "running",
            RecordStatus::Finished => "finished",
            RecordStatus::Failed => "failed",
        }
    }
}

/// Errors reported by a recorder backend
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("tracking server unreachable: {0}")]
    Unreachable(String),
    #[error("tracking server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected tracking response: {0}")]
    Malformed(String),
    #[error("unknown recorder run {0}")]
    UnknownRun(String),
}

/// Experiment-tracking interface
#[async_trait]
pub trait ExperimentRecorder: Send + Sync {
    /// Open a run for `metric` and return its recorder-side identifier
    async fn start_run(&self, metric: &str) -> std::result::Result<String, RecorderError>;

    async fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<(), RecorderError>;

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> std::result::Result<(), RecorderError>;

    async fn log_artifact(
        &self,
        run_id: &str,
        path: &str,
        kind: &str,
    ) -> std::result::Result<(), RecorderError>;

    async fn end_run(
        &self,
        run_id: &str,
        status: RecordStatus,
    ) -> std::result::Result<(), RecorderError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Recorder used when tracking is disabled
pub struct NoopRecorder;

#[async_trait]
impl ExperimentRecorder for NoopRecorder {
    async fn start_run(&self, _metric: &str) -> std::result::Result<String, RecorderError> {
        Ok("noop".to_string())
    }

    async fn log_params(
        &self,
        _run_id: &str,
        _params: &BTreeMap<String, String>,
    ) -> std::result::Result<(), RecorderError> {
        Ok(())
    }

    async fn log_metrics(
        &self,
        _run_id: &str,
        _metrics: &BTreeMap<String, f64>,
        _step: u64,
    ) -> std::result::Result<(), RecorderError> {
        Ok(())
    }

    async fn log_artifact(
        &self,
        _run_id: &str,
        _path: &str,
        _kind: &str,
    ) -> std::result::Result<(), RecorderError> {
        Ok(())
    }

    async fn end_run(
        &self,
        _run_id: &str,
        _status: RecordStatus,
    ) -> std::result::Result<(), RecorderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Build the recorder selected in configuration
pub fn recorder_from_config(config: &RecorderConfig) -> Result<Arc<dyn ExperimentRecorder>> {
    match config {
        RecorderConfig::File { root } => Ok(Arc::new(FileRecorder::new(root.clone()))),
        RecorderConfig::Mlflow {
            tracking_uri,
            experiment_name,
        } => Ok(Arc::new(MlflowRecorder::new(tracking_uri, experiment_name)?)),
        RecorderConfig::Disabled => Ok(Arc::new(NoopRecorder)),
    }
}

/// Recorder handle that applies the retry policy to every call and reports
/// exhausted retries as artifact write failures
#[derive(Clone)]
pub struct RetryingRecorder {
    inner: Arc<dyn ExperimentRecorder>,
    retry: RetryPolicy,
}

impl RetryingRecorder {
    pub fn new(inner: Arc<dyn ExperimentRecorder>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    fn failure(&self, what: &str, reason: String) -> PipelineError {
        PipelineError::artifact_write(format!("{} recorder {}", self.inner.name(), what), reason)
    }

    pub async fn start_run(&self, metric: &str) -> Result<String> {
        retry_with_backoff(&self.retry, "recorder start_run", || {
            self.inner.start_run(metric)
        })
        .await
        .map_err(|e| self.failure("start_run", e.to_string()))
    }

    pub async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        retry_with_backoff(&self.retry, "recorder log_params", || {
            self.inner.log_params(run_id, params)
        })
        .await
        .map_err(|e| self.failure("log_params", e.to_string()))
    }

    pub async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> Result<()> {
        retry_with_backoff(&self.retry, "recorder log_metrics", || {
            self.inner.log_metrics(run_id, metrics, step)
        })
        .await
        .map_err(|e| self.failure("log_metrics", e.to_string()))
    }

    pub async fn log_artifact(&self, run_id: &str, path: &str, kind: &str) -> Result<()> {
        retry_with_backoff(&self.retry, "recorder log_artifact", || {
            self.inner.log_artifact(run_id, path, kind)
        })
        .await
        .map_err(|e| self.failure("log_artifact", e.to_string()))
    }

    pub async fn end_run(&self, run_id: &str, status: RecordStatus) -> Result<()> {
        retry_with_backoff(&self.retry, "recorder end_run", || {
            self.inner.end_run(run_id, status)
        })
        .await
        .map_err(|e| self.failure("end_run", e.to_string()))
    }
}
