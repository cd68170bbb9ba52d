//! Execution state models

use crate::core::{PipelineName, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one pipeline run
///
/// `Pending -> Running(step) -> ... -> Completed`, or one of the terminals
/// `Skipped(step)` / `Failed(step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "step", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Running(StepName),
    Completed,
    /// Stopped early by the step that raised the skip signal
    Skipped(StepName),
    /// Stopped by a step reporting failure under `AbortOnFailure`
    Failed(StepName),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Skipped(_) | PipelineState::Failed(_)
        )
    }

    /// Short status label used in reports and the history store
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Running(_) => "running",
            PipelineState::Completed => "completed",
            PipelineState::Skipped(_) => "skipped",
            PipelineState::Failed(_) => "failed",
        }
    }

    /// Step the state refers to, if any
    pub fn step(&self) -> Option<StepName> {
        match self {
            PipelineState::Running(step)
            | PipelineState::Skipped(step)
            | PipelineState::Failed(step) => Some(*step),
            PipelineState::Pending | PipelineState::Completed => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step() {
            Some(step) => write!(f, "{} ({})", self.label(), step),
            None => f.write_str(self.label()),
        }
    }
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: StepName,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What a finished pipeline run looked like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: PipelineName,
    pub status: PipelineState,

    /// Steps in the order they ran
    pub steps: Vec<StepRecord>,

    /// Number of steps `build_steps()` declared
    pub total_steps: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Aggregate result of the run
    ///
    /// Skipping is a normal outcome and counts as success.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            PipelineState::Completed | PipelineState::Skipped(_)
        )
    }

    /// Step that stopped the run early
    pub fn skipped_at(&self) -> Option<StepName> {
        match self.status {
            PipelineState::Skipped(step) => Some(step),
            _ => None,
        }
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.success)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
