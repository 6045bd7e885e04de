//! Append-only experiment log on the local filesystem
//!
//! Layout: `<root>/<metric>/<run_id>/{meta.json, params.jsonl, metrics.jsonl, artifacts.jsonl}`

use super::{async_trait, ExperimentRecorder, RecordStatus, RecorderError};
use crate::artifacts::write_atomic;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub metric: String,
    pub status: RecordStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

pub struct FileRecorder {
    root: PathBuf,
    runs: RwLock<HashMap<String, RunMeta>>,
}

impl FileRecorder {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            runs: RwLock::new(HashMap::new()),
        }
    }

    async fn run_dir(&self, run_id: &str) -> Result<PathBuf, RecorderError> {
        let runs = self.runs.read().await;
        let meta = runs
            .get(run_id)
            .ok_or_else(|| RecorderError::UnknownRun(run_id.to_string()))?;
        Ok(self.root.join(&meta.metric).join(run_id))
    }

    async fn write_meta(&self, meta: &RunMeta) -> Result<(), RecorderError> {
        let path = self.root.join(&meta.metric).join(&meta.run_id).join("meta.json");
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| RecorderError::Malformed(e.to_string()))?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    async fn append(&self, run_id: &str, file: &str, lines: &[serde_json::Value]) -> Result<(), RecorderError> {
        let path = self.run_dir(run_id).await?.join(file);
        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(&line.to_string());
            buffer.push('\n');
        }
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        handle.write_all(buffer.as_bytes()).await?;
        handle.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl ExperimentRecorder for FileRecorder {
    async fn start_run(&self, metric: &str) -> Result<String, RecorderError> {
        let meta = RunMeta {
            run_id: Uuid::new_v4().simple().to_string(),
            metric: metric.to_string(),
            status: RecordStatus::Running,
            start_time: Utc::now().timestamp_millis(),
            end_time: None,
        };
        self.write_meta(&meta).await?;
        let run_id = meta.run_id.clone();
        self.runs.write().await.insert(run_id.clone(), meta);
        Ok(run_id)
    }

    async fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), RecorderError> {
        let lines: Vec<_> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.append(run_id, "params.jsonl", &lines).await
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> Result<(), RecorderError> {
        let timestamp = Utc::now().timestamp_millis();
        let lines: Vec<_> = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "step": step, "timestamp": timestamp })
            })
            .collect();
        self.append(run_id, "metrics.jsonl", &lines).await
    }

    async fn log_artifact(&self, run_id: &str, path: &str, kind: &str) -> Result<(), RecorderError> {
        self.append(
            run_id,
            "artifacts.jsonl",
            &[json!({ "path": path, "kind": kind })],
        )
        .await
    }

    async fn end_run(&self, run_id: &str, status: RecordStatus) -> Result<(), RecorderError> {
        let meta = {
            let mut runs = self.runs.write().await;
            let meta = runs
                .get_mut(run_id)
                .ok_or_else(|| RecorderError::UnknownRun(run_id.to_string()))?;
            meta.status = status;
            meta.end_time = Some(Utc::now().timestamp_millis());
            meta.clone()
        };
        self.write_meta(&meta).await
    }

    fn name(&self) -> &str {
        "file"
    }
}
