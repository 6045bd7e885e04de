//! Per-invocation ledger of metric outcomes

use super::{PipelineCommand, Stage, StageTransition};
use crate::error::ErrorKind;
use crate::models::TimeWindow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Exit status when some metrics succeeded and some failed
pub const EXIT_PARTIAL: i32 = 8;
/// Exit status when every metric failed with differing kinds
pub const EXIT_MIXED_FAILURE: i32 = 9;
/// Exit status for failures without a classified kind
pub const EXIT_INTERNAL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => RunStatus::Succeeded,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        }
    }
}

/// Terminal state of one metric's pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOutcome {
    pub metric: String,
    /// `Done` or `Failed`
    pub state: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Stages whose existing output was reused
    #[serde(default)]
    pub reused: Vec<Stage>,
    pub transitions: Vec<StageTransition>,
}

impl MetricOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == Stage::Done
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub command: PipelineCommand,
    pub window: TimeWindow,
    pub started_at: i64,
    pub finished_at: i64,
    pub status: RunStatus,
    pub metrics: Vec<MetricOutcome>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        command: PipelineCommand,
        window: TimeWindow,
        started_at: i64,
        finished_at: i64,
        metrics: Vec<MetricOutcome>,
    ) -> Self {
        let succeeded = metrics.iter().filter(|m| m.succeeded()).count();
        let status = RunStatus::from_counts(succeeded, metrics.len() - succeeded);
        Self {
            run_id: run_id.into(),
            command,
            window,
            started_at,
            finished_at,
            status,
            metrics,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.metrics.iter().filter(|m| m.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.metrics.len() - self.succeeded()
    }

    /// Process exit status for the invocation.
    ///
    /// A total failure with a single error kind exits with that kind's code.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => 0,
            RunStatus::Partial => EXIT_PARTIAL,
            RunStatus::Failed => {
                let kinds: BTreeSet<Option<ErrorKind>> = self
                    .metrics
                    .iter()
                    .filter(|m| !m.succeeded())
                    .map(|m| m.error_kind)
                    .collect();
                match kinds.into_iter().collect::<Vec<_>>().as_slice() {
                    [Some(kind)] => kind.exit_code(),
                    [None] => EXIT_INTERNAL,
                    _ => EXIT_MIXED_FAILURE,
                }
            }
        }
    }
}
