//! MLflow tracking server client (REST API 2.0)

use super::{async_trait, ExperimentRecorder, RecordStatus, RecorderError};
use crate::error::{PipelineError, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: RunEnvelope,
}

pub struct MlflowRecorder {
    client: Client,
    base_url: Url,
    experiment_name: String,
    experiment_id: OnceCell<String>,
}

impl MlflowRecorder {
    pub fn new(tracking_uri: &str, experiment_name: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        let mut base = tracking_uri.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            PipelineError::Config(format!("invalid tracking URI {}: {}", tracking_uri, e))
        })?;

        Ok(Self {
            client,
            base_url,
            experiment_name: experiment_name.to_string(),
            experiment_id: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, RecorderError> {
        self.base_url
            .join(&format!("api/2.0/mlflow/{}", path))
            .map_err(|e| RecorderError::Malformed(e.to_string()))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<(StatusCode, String), RecorderError> {
        let response = request
            .send()
            .await
            .map_err(|e| RecorderError::Unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RecorderError::Unreachable(e.to_string()))?;
        Ok((status, body))
    }

    async fn post(&self, path: &str, payload: Value) -> std::result::Result<String, RecorderError> {
        let (status, body) = self
            .send(self.client.post(self.endpoint(path)?).json(&payload))
            .await?;
        if !status.is_success() {
            return Err(RecorderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Resolve the experiment by name, creating it on first use
    async fn experiment_id(&self) -> std::result::Result<&str, RecorderError> {
        self.experiment_id
            .get_or_try_init(|| async {
                let mut url = self.endpoint("experiments/get-by-name")?;
                url.query_pairs_mut()
                    .append_pair("experiment_name", &self.experiment_name);
                let (status, body) = self.send(self.client.get(url)).await?;

                if status.is_success() {
                    let parsed: GetExperimentResponse = serde_json::from_str(&body)
                        .map_err(|e| RecorderError::Malformed(e.to_string()))?;
                    return Ok(parsed.experiment.experiment_id);
                }
                if status != StatusCode::NOT_FOUND {
                    return Err(RecorderError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }

                let body = self
                    .post(
                        "experiments/create",
                        json!({ "name": self.experiment_name }),
                    )
                    .await?;
                let created: CreateExperimentResponse = serde_json::from_str(&body)
                    .map_err(|e| RecorderError::Malformed(e.to_string()))?;
                Ok(created.experiment_id)
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl ExperimentRecorder for MlflowRecorder {
    async fn start_run(&self, metric: &str) -> std::result::Result<String, RecorderError> {
        let experiment_id = self.experiment_id().await?;
        let body = self
            .post(
                "runs/create",
                json!({
                    "experiment_id": experiment_id,
                    "run_name": metric,
                    "start_time": Utc::now().timestamp_millis(),
                    "tags": [{ "key": "metric", "value": metric }],
                }),
            )
            .await?;
        let created: CreateRunResponse =
            serde_json::from_str(&body).map_err(|e| RecorderError::Malformed(e.to_string()))?;
        Ok(created.run.info.run_id)
    }

    async fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<(), RecorderError> {
        let params: Vec<Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.post("runs/log-batch", json!({ "run_id": run_id, "params": params }))
            .await
            .map(|_| ())
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
        step: u64,
    ) -> std::result::Result<(), RecorderError> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<Value> = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": step })
            })
            .collect();
        self.post("runs/log-batch", json!({ "run_id": run_id, "metrics": metrics }))
            .await
            .map(|_| ())
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        path: &str,
        kind: &str,
    ) -> std::result::Result<(), RecorderError> {
        self.post(
            "runs/set-tag",
            json!({ "run_id": run_id, "key": format!("artifact.{}", kind), "value": path }),
        )
        .await
        .map(|_| ())
    }

    async fn end_run(
        &self,
        run_id: &str,
        status: RecordStatus,
    ) -> std::result::Result<(), RecorderError> {
        let status = match status {
            RecordStatus::Running => "RUNNING",
            RecordStatus::Finished => "FINISHED",
            RecordStatus::Failed => "FAILED",
        };
        self.post(
            "runs/update",
            json!({
                "run_id": run_id,
                "status": status,
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .await
        .map(|_| ())
    }

    fn name(&self) -> &str {
        "mlflow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_existing_experiment_and_run() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/api/2.0/mlflow/experiments/get-by-name")
            .match_query(Matcher::UrlEncoded(
                "experiment_name".into(),
                "SARIMA_Forecasting".into(),
            ))
            .with_status(200)
            .with_body(r#"{"experiment": {"experiment_id": "7", "name": "SARIMA_Forecasting"}}"#)
            .expect(1)
            .create_async()
            .await;
        let create_run = server
            .mock("POST", "/api/2.0/mlflow/runs/create")
            .match_body(Matcher::PartialJson(json!({ "experiment_id": "7" })))
            .with_status(200)
            .with_body(r#"{"run": {"info": {"run_id": "abc123"}}}"#)
            .expect(2)
            .create_async()
            .await;

        let recorder = MlflowRecorder::new(&server.url(), "SARIMA_Forecasting").unwrap();
        assert_eq!(recorder.start_run("cpu").await.unwrap(), "abc123");
        assert_eq!(recorder.start_run("memory").await.unwrap(), "abc123");

        lookup.assert_async().await;
        create_run.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_experiment_is_created() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/api/2.0/mlflow/experiments/get-by-name")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error_code": "RESOURCE_DOES_NOT_EXIST"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/api/2.0/mlflow/experiments/create")
            .match_body(Matcher::PartialJson(json!({ "name": "SARIMA_Forecasting" })))
            .with_status(200)
            .with_body(r#"{"experiment_id": "12"}"#)
            .create_async()
            .await;
        let _run = server
            .mock("POST", "/api/2.0/mlflow/runs/create")
            .match_body(Matcher::PartialJson(json!({ "experiment_id": "12" })))
            .with_status(200)
            .with_body(r#"{"run": {"info": {"run_id": "r-1"}}}"#)
            .create_async()
            .await;

        let recorder = MlflowRecorder::new(&server.url(), "SARIMA_Forecasting").unwrap();
        assert_eq!(recorder.start_run("cpu").await.unwrap(), "r-1");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_log_batch_and_update() {
        let mut server = mockito::Server::new_async().await;
        let batch = server
            .mock("POST", "/api/2.0/mlflow/runs/log-batch")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({ "run_id": "r-1" })),
                Matcher::Regex(r#""key":"aic""#.to_string()),
                Matcher::Regex(r#""step":3"#.to_string()),
            ]))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let update = server
            .mock("POST", "/api/2.0/mlflow/runs/update")
            .match_body(Matcher::PartialJson(json!({ "run_id": "r-1", "status": "FAILED" })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let recorder = MlflowRecorder::new(&server.url(), "SARIMA_Forecasting").unwrap();
        let metrics = BTreeMap::from([("aic".to_string(), 10.5)]);
        recorder.log_metrics("r-1", &metrics, 3).await.unwrap();
        recorder.end_run("r-1", RecordStatus::Failed).await.unwrap();

        batch.assert_async().await;
        update.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/2.0/mlflow/runs/set-tag")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let recorder = MlflowRecorder::new(&server.url(), "SARIMA_Forecasting").unwrap();
        let err = recorder.log_artifact("r-1", "models/cpu/v1.json", "model").await.unwrap_err();
        assert!(matches!(err, RecorderError::Status { status: 503, .. }));
    }
}
