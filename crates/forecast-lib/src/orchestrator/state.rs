//! Per-metric stage machine

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Position of one metric's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Ingesting,
    Preprocessing,
    Training,
    Forecasting,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Ingesting => "ingesting",
            Stage::Preprocessing => "preprocessing",
            Stage::Training => "training",
            Stage::Forecasting => "forecasting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn is_working(&self) -> bool {
        matches!(
            self,
            Stage::Ingesting | Stage::Preprocessing | Stage::Training | Stage::Forecasting
        )
    }

    /// Legal moves: a command may enter at any working stage, stages only
    /// move forward one step at a time, and every non-terminal stage may
    /// finish (`Done` only from a working stage) or fail.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Stage::Failed) => true,
            (Stage::Pending, to) => to.is_working(),
            (from, Stage::Done) => from.is_working(),
            (Stage::Ingesting, Stage::Preprocessing)
            | (Stage::Preprocessing, Stage::Training)
            | (Stage::Training, Stage::Forecasting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamped entry in a machine's history (unix millis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub to: Stage,
}

/// State of one metric's pipeline for one invocation
#[derive(Debug, Clone)]
pub struct StageMachine {
    current: Stage,
    history: Vec<StageTransition>,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: Stage::Pending,
            history: vec![StageTransition {
                stage: Stage::Pending,
                at: Utc::now().timestamp_millis(),
            }],
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Last working stage entered, if any
    pub fn last_working(&self) -> Option<Stage> {
        self.history
            .iter()
            .rev()
            .map(|t| t.stage)
            .find(|s| s.is_working())
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), IllegalTransition> {
        if !self.current.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        self.history.push(StageTransition {
            stage: next,
            at: Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    /// Move to `Failed` from wherever the machine is, unless already terminal
    pub fn fail(&mut self) -> Option<Stage> {
        let failed_stage = self.last_working();
        if self.advance(Stage::Failed).is_err() {
            return None;
        }
        failed_stage
    }

    pub fn into_history(self) -> Vec<StageTransition> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence() {
        let mut machine = StageMachine::new();
        for stage in [
            Stage::Ingesting,
            Stage::Preprocessing,
            Stage::Training,
            Stage::Forecasting,
            Stage::Done,
        ] {
            machine.advance(stage).unwrap();
        }
        assert_eq!(machine.current(), Stage::Done);
        let history = machine.into_history();
        assert_eq!(history.len(), 6);
        assert!(history.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[test]
    fn test_stages_cannot_be_skipped_or_repeated() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::Ingesting).unwrap();
        assert!(machine.advance(Stage::Training).is_err());
        assert!(machine.advance(Stage::Ingesting).is_err());
        assert!(!Stage::Pending.can_transition_to(Stage::Done));
    }

    #[test]
    fn test_failed_is_reachable_from_any_working_stage() {
        for stage in [
            Stage::Ingesting,
            Stage::Preprocessing,
            Stage::Training,
            Stage::Forecasting,
        ] {
            let mut machine = StageMachine::new();
            machine.advance(stage).unwrap();
            assert_eq!(machine.fail(), Some(stage));
            assert_eq!(machine.current(), Stage::Failed);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::Forecasting).unwrap();
        machine.advance(Stage::Done).unwrap();
        assert!(machine.advance(Stage::Failed).is_err());
        assert_eq!(machine.fail(), None);
        assert_eq!(machine.current(), Stage::Done);
    }
}
