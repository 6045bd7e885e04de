//! Versioned artifact store on the local filesystem
//!
//! Every write goes to a unique temporary file in the destination directory,
//! is fsynced, then renamed over the target, so readers never observe a
//! partially written artifact. Writes are keyed by metric and run/version,
//! which keeps concurrent metric pipelines from touching the same file.

pub mod layout;


pub use layout::SnapshotKind;

use crate::config::RetryPolicy;
use crate::error::{PipelineError, Result};
use crate::models::{
    format_timestamp, ForecastPoint, ForecastResult, MetricPoint, MetricSeries, SarimaOrder,
    TrainedModel, TrainingWindow,
};
use crate::orchestrator::RunRecord;
use crate::retry::retry_with_backoff;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Failures while reading artifacts back
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {key}: {reason}")]
    Decode { key: String, reason: String },
    #[error("checksum mismatch for {key}: expected {expected}, computed {actual}")]
    Checksum {
        key: String,
        expected: String,
        actual: String,
    },
}

/// Contents of `models/<metric>/latest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPointer {
    pub metric: String,
    pub version: String,
    pub file: String,
    pub sha256: String,
    pub order: SarimaOrder,
    pub aic: f64,
    pub bic: f64,
    pub trained_at: i64,
    pub window: TrainingWindow,
}

/// One persisted model version, as listed for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelListing {
    pub metric: String,
    pub version: String,
    pub order: SarimaOrder,
    pub aic: f64,
    pub bic: f64,
    pub trained_at: i64,
    pub observations: usize,
    pub latest: bool,
}

/// Forecast metadata stored next to the tabular forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMeta {
    pub metric: String,
    pub model_version: String,
    pub generated_at: i64,
    pub horizon: usize,
    pub confidence_level: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ForecastRow {
    timestamp: String,
    forecast: f64,
    lower_bound: f64,
    upper_bound: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    timestamp: String,
    value: f64,
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn parse_timestamp(key: &str, raw: &str) -> std::result::Result<i64, ArtifactError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| ArtifactError::Decode {
            key: key.to_string(),
            reason: format!("bad timestamp {:?}: {}", raw, e),
        })
}

/// Write `bytes` to a unique temporary file beside `path`, fsync, then rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(IoErrorKind::InvalidInput, "artifact path has no parent"))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let mut file = fs::File::create(&temp_path).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Filesystem-backed artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    retry: RetryPolicy,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Atomically write `bytes` under `key`, retrying transient failures
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key);
        let operation = format!("write artifact {}", key);
        retry_with_backoff(&self.retry, &operation, || write_atomic(&path, bytes))
            .await
            .map_err(|e| PipelineError::artifact_write(key, e.to_string()))?;
        debug!(key = %key, bytes = bytes.len(), "Artifact written");
        Ok(key.to_string())
    }

    /// Read the artifact under `key`; `None` when it does not exist
    pub async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, ArtifactError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| PipelineError::artifact_write(key, e.to_string()))?;
        self.put(key, &bytes).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::result::Result<Option<T>, ArtifactError> {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ArtifactError::Decode {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    // ---- series snapshots ----

    pub async fn save_snapshot(
        &self,
        run_id: &str,
        kind: SnapshotKind,
        series: &MetricSeries,
    ) -> Result<String> {
        let key = layout::snapshot(&series.metric, run_id, kind);
        let mut writer = csv::Writer::from_writer(Vec::new());
        for point in &series.points {
            writer
                .serialize(SnapshotRow {
                    timestamp: format_timestamp(point.timestamp),
                    value: point.value,
                })
                .map_err(|e| PipelineError::artifact_write(&key, e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::artifact_write(&key, e.to_string()))?;
        self.put(&key, &bytes).await
    }

    pub async fn load_snapshot(
        &self,
        metric: &str,
        run_id: &str,
        kind: SnapshotKind,
        interval_secs: i64,
    ) -> std::result::Result<Option<MetricSeries>, ArtifactError> {
        let key = layout::snapshot(metric, run_id, kind);
        let Some(bytes) = self.get(&key).await? else {
            return Ok(None);
        };
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut points = Vec::new();
        for row in reader.deserialize::<SnapshotRow>() {
            let row = row.map_err(|e| ArtifactError::Decode {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            points.push(MetricPoint::new(parse_timestamp(&key, &row.timestamp)?, row.value));
        }
        Ok(Some(MetricSeries::new(metric, interval_secs, points)))
    }

    // ---- models ----

    pub async fn model_exists(&self, metric: &str, version: &str) -> bool {
        self.exists(&layout::model(metric, version)).await
    }

    /// Persist a trained model and its summary, then move the latest pointer.
    ///
    /// The pointer is written last so it only ever references a complete model.
    pub async fn save_model(&self, model: &TrainedModel, summary: &str) -> Result<ModelPointer> {
        let key = layout::model(&model.metric, &model.version);
        let bytes = serde_json::to_vec_pretty(model)
            .map_err(|e| PipelineError::artifact_write(&key, e.to_string()))?;
        self.put(&key, &bytes).await?;
        self.put(
            &layout::model_summary(&model.metric, &model.version),
            summary.as_bytes(),
        )
        .await?;

        let pointer = ModelPointer {
            metric: model.metric.clone(),
            version: model.version.clone(),
            file: key,
            sha256: compute_checksum(&bytes),
            order: model.order,
            aic: model.aic,
            bic: model.bic,
            trained_at: model.trained_at,
            window: model.window,
        };
        self.put_json(&layout::model_pointer(&model.metric), &pointer)
            .await?;

        info!(
            metric = %model.metric,
            version = %model.version,
            checksum = %pointer.sha256,
            "Model persisted"
        );
        Ok(pointer)
    }

    pub async fn latest_pointer(
        &self,
        metric: &str,
    ) -> std::result::Result<Option<ModelPointer>, ArtifactError> {
        self.get_json(&layout::model_pointer(metric)).await
    }

    pub async fn load_model(
        &self,
        metric: &str,
        version: &str,
    ) -> std::result::Result<Option<TrainedModel>, ArtifactError> {
        self.get_json(&layout::model(metric, version)).await
    }

    /// Load the model the latest pointer references, verifying its checksum
    pub async fn load_latest_model(
        &self,
        metric: &str,
    ) -> std::result::Result<Option<(ModelPointer, TrainedModel)>, ArtifactError> {
        let Some(pointer) = self.latest_pointer(metric).await? else {
            return Ok(None);
        };
        let Some(bytes) = self.get(&pointer.file).await? else {
            return Err(ArtifactError::Decode {
                key: pointer.file.clone(),
                reason: "latest pointer references a missing model".to_string(),
            });
        };

        let actual = compute_checksum(&bytes);
        if actual != pointer.sha256 {
            return Err(ArtifactError::Checksum {
                key: pointer.file.clone(),
                expected: pointer.sha256.clone(),
                actual,
            });
        }
        let model = serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Decode {
            key: pointer.file.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some((pointer, model)))
    }

    /// Every persisted model version, grouped by metric, oldest first
    pub async fn list_models(&self) -> std::result::Result<Vec<ModelListing>, ArtifactError> {
        let mut listings = Vec::new();
        for metric in self.list_dir("models").await? {
            let latest = self.latest_pointer(&metric).await?.map(|p| p.version);
            let files = self.list_dir(&layout::models_dir(&metric)).await?;
            for file in files {
                let Some(version) = file.strip_suffix(".json") else {
                    continue;
                };
                if file == layout::LATEST_POINTER {
                    continue;
                }
                if let Some(model) = self.load_model(&metric, version).await? {
                    listings.push(ModelListing {
                        latest: latest.as_deref() == Some(version),
                        metric: model.metric,
                        version: model.version,
                        order: model.order,
                        aic: model.aic,
                        bic: model.bic,
                        trained_at: model.trained_at,
                        observations: model.window.observations,
                    });
                }
            }
        }
        listings.sort_by(|a, b| {
            a.metric
                .cmp(&b.metric)
                .then(a.trained_at.cmp(&b.trained_at))
                .then_with(|| a.version.cmp(&b.version))
        });
        Ok(listings)
    }

    /// Sorted entry names of a directory; empty when it does not exist
    async fn list_dir(&self, key: &str) -> std::result::Result<Vec<String>, ArtifactError> {
        let mut entries = match fs::read_dir(self.path_for(key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArtifactError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };
        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(name) = entry.file_name().to_str() {
                        if !name.starts_with('.') {
                            names.push(name.to_string());
                        }
                    }
                }
                Ok(None) => break,
                Err(source) => {
                    return Err(ArtifactError::Io {
                        key: key.to_string(),
                        source,
                    })
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Metrics with a model directory or a forecast, sorted
    pub async fn list_metrics(&self) -> std::result::Result<Vec<String>, ArtifactError> {
        let mut metrics = self.list_dir("models").await?;
        for file in self.list_dir("forecasts").await? {
            if let Some(metric) = file.strip_suffix(".meta.json") {
                if !metrics.iter().any(|m| m == metric) {
                    metrics.push(metric.to_string());
                }
            }
        }
        metrics.sort();
        Ok(metrics)
    }

    // ---- forecasts ----

    /// Replace the latest forecast for the metric; returns the keys written
    pub async fn save_forecast(&self, forecast: &ForecastResult) -> Result<Vec<String>> {
        let key = layout::forecast(&forecast.metric);
        let mut writer = csv::Writer::from_writer(Vec::new());
        for point in &forecast.points {
            writer
                .serialize(ForecastRow {
                    timestamp: format_timestamp(point.timestamp),
                    forecast: point.point,
                    lower_bound: point.lower,
                    upper_bound: point.upper,
                })
                .map_err(|e| PipelineError::artifact_write(&key, e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::artifact_write(&key, e.to_string()))?;

        let meta = ForecastMeta {
            metric: forecast.metric.clone(),
            model_version: forecast.model_version.clone(),
            generated_at: forecast.generated_at,
            horizon: forecast.horizon,
            confidence_level: forecast.confidence_level,
        };
        let csv_key = self.put(&key, &bytes).await?;
        let meta_key = self
            .put_json(&layout::forecast_meta(&forecast.metric), &meta)
            .await?;
        Ok(vec![csv_key, meta_key])
    }

    pub async fn load_forecast(
        &self,
        metric: &str,
    ) -> std::result::Result<Option<ForecastResult>, ArtifactError> {
        let Some(meta) = self
            .get_json::<ForecastMeta>(&layout::forecast_meta(metric))
            .await?
        else {
            return Ok(None);
        };
        let key = layout::forecast(metric);
        let Some(bytes) = self.get(&key).await? else {
            return Ok(None);
        };

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut points = Vec::new();
        for row in reader.deserialize::<ForecastRow>() {
            let row = row.map_err(|e| ArtifactError::Decode {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            points.push(ForecastPoint {
                timestamp: parse_timestamp(&key, &row.timestamp)?,
                point: row.forecast,
                lower: row.lower_bound,
                upper: row.upper_bound,
            });
        }
        Ok(Some(ForecastResult {
            metric: meta.metric,
            model_version: meta.model_version,
            generated_at: meta.generated_at,
            horizon: meta.horizon,
            confidence_level: meta.confidence_level,
            points,
        }))
    }

    // ---- run records and metrics ----

    pub async fn save_run_record(&self, record: &RunRecord) -> Result<String> {
        self.put_json(
            &layout::run_record(&record.run_id, record.command.as_str()),
            record,
        )
        .await
    }

    /// All run records, newest first
    pub async fn list_run_records(&self) -> std::result::Result<Vec<RunRecord>, ArtifactError> {
        let mut records = Vec::new();
        for run_id in self.list_dir("runs").await? {
            for file in self.list_dir(&format!("runs/{}", run_id)).await? {
                if !file.ends_with(".json") {
                    continue;
                }
                if let Some(record) = self
                    .get_json::<RunRecord>(&format!("runs/{}/{}", run_id, file))
                    .await?
                {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(records)
    }

    /// Write the Prometheus textfile
    pub async fn write_metrics(&self, text: &str) -> Result<String> {
        self.put(layout::METRICS_TEXTFILE, text.as_bytes()).await
    }
}
