//! Error taxonomy for the forecasting pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of pipeline failures, shared by run records and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Store unreachable or empty window
    DataUnavailable,
    /// Window shorter than the minimum history, or gap-fill threshold exceeded
    InsufficientHistory,
    /// No model candidate converged
    ModelFitFailure,
    /// Model unloadable or invalid horizon
    ForecastGenerationError,
    /// Persistence rejected a write after retries
    ArtifactWriteFailure,
    /// Invalid configuration or arguments
    Configuration,
}

impl ErrorKind {
    /// Process exit status for this kind of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::DataUnavailable => 3,
            ErrorKind::InsufficientHistory => 4,
            ErrorKind::ModelFitFailure => 5,
            ErrorKind::ForecastGenerationError => 6,
            ErrorKind::ArtifactWriteFailure => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::InsufficientHistory => "insufficient_history",
            ErrorKind::ModelFitFailure => "model_fit_failure",
            ErrorKind::ForecastGenerationError => "forecast_generation_error",
            ErrorKind::ArtifactWriteFailure => "artifact_write_failure",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data unavailable for {metric}: {reason}")]
    DataUnavailable { metric: String, reason: String },

    #[error("insufficient history for {metric}: {reason}")]
    InsufficientHistory { metric: String, reason: String },

    #[error("model fit failed for {metric}: {reason}")]
    ModelFitFailure { metric: String, reason: String },

    #[error("forecast generation failed for {metric}: {reason}")]
    ForecastGeneration { metric: String, reason: String },

    #[error("artifact write failed for {key}: {reason}")]
    ArtifactWrite { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            PipelineError::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
            PipelineError::ModelFitFailure { .. } => ErrorKind::ModelFitFailure,
            PipelineError::ForecastGeneration { .. } => ErrorKind::ForecastGenerationError,
            PipelineError::ArtifactWrite { .. } => ErrorKind::ArtifactWriteFailure,
            PipelineError::Config(_) => ErrorKind::Configuration,
        }
    }

    pub fn data_unavailable(metric: &str, reason: impl Into<String>) -> Self {
        PipelineError::DataUnavailable {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    pub fn insufficient_history(metric: &str, reason: impl Into<String>) -> Self {
        PipelineError::InsufficientHistory {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    pub fn model_fit(metric: &str, reason: impl Into<String>) -> Self {
        PipelineError::ModelFitFailure {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    pub fn forecast(metric: &str, reason: impl Into<String>) -> Self {
        PipelineError::ForecastGeneration {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    pub fn artifact_write(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::ArtifactWrite {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::DataUnavailable,
            ErrorKind::InsufficientHistory,
            ErrorKind::ModelFitFailure,
            ErrorKind::ForecastGenerationError,
            ErrorKind::ArtifactWriteFailure,
            ErrorKind::Configuration,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = PipelineError::data_unavailable("cpu", "store unreachable");
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
        assert!(err.to_string().contains("cpu"));

        let err = PipelineError::artifact_write("models/cpu/v1.json", "disk full");
        assert_eq!(err.kind(), ErrorKind::ArtifactWriteFailure);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ModelFitFailure).unwrap();
        assert_eq!(json, "\"model_fit_failure\"");
    }
}
