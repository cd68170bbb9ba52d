//! Run history: one summary per pipeline run

pub mod store;

pub use store::SqliteHistoryStore;

use crate::core::{PipelineName, PipelineState, RunReport, StepName};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: PipelineName,
    pub status: PipelineState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Steps that ran, failed ones included
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub total_steps: usize,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl From<&RunReport> for RunSummary {
    fn from(report: &RunReport) -> Self {
        Self {
            run_id: report.run_id,
            pipeline: report.pipeline,
            status: report.status,
            started_at: report.started_at,
            finished_at: report.finished_at,
            completed_steps: report.steps.len(),
            failed_steps: report.failed_steps().count(),
            total_steps: report.total_steps,
        }
    }
}

/// Rebuild a state from its stored label and step
pub(crate) fn state_from_columns(label: &str, step: Option<&str>) -> Result<PipelineState> {
    let step = step.map(str::parse::<StepName>).transpose()?;
    Ok(match (label, step) {
        ("pending", _) => PipelineState::Pending,
        ("completed", _) => PipelineState::Completed,
        ("running", Some(step)) => PipelineState::Running(step),
        ("skipped", Some(step)) => PipelineState::Skipped(step),
        ("failed", Some(step)) => PipelineState::Failed(step),
        (label, step) => bail!("Invalid stored state {label:?} (step {step:?})"),
    })
}

/// Where run summaries are kept
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent first, optionally for one pipeline
    async fn list_runs(&self, pipeline: Option<PipelineName>, limit: usize)
        -> Result<Vec<RunSummary>>;

    /// Pipelines with at least one stored run
    async fn list_pipelines(&self) -> Result<Vec<PipelineName>>;
}

/// In-memory history (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryHistory {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for InMemoryHistory {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(
        &self,
        pipeline: Option<PipelineName>,
        limit: usize,
    ) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| pipeline.map_or(true, |p| run.pipeline == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineName>> {
        let runs = self.runs.read().await;
        let mut pipelines: Vec<PipelineName> = runs.values().map(|run| run.pipeline).collect();
        pipelines.sort();
        pipelines.dedup();
        Ok(pipelines)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn summary(pipeline: PipelineName, status: PipelineState, minutes_ago: i64) -> RunSummary {
        let started_at = Utc::now() - Duration::minutes(minutes_ago);
        RunSummary {
            run_id: Uuid::new_v4(),
            pipeline,
            status,
            started_at,
            finished_at: started_at + Duration::seconds(3),
            completed_steps: 2,
            failed_steps: 0,
            total_steps: 4,
        }
    }

    #[test]
    fn test_state_from_columns() {
        assert_eq!(
            state_from_columns("skipped", Some("check-index-daily-close")).unwrap(),
            PipelineState::Skipped(StepName::CheckIndexDailyClose)
        );
        assert_eq!(state_from_columns("completed", None).unwrap(), PipelineState::Completed);
        assert!(state_from_columns("failed", None).is_err());
        assert!(state_from_columns("completed", Some("no-such-step")).is_err());
    }

    #[test]
    fn test_progress() {
        let run = summary(PipelineName::Financials, PipelineState::Completed, 0);
        assert_eq!(run.progress(), 0.5);
        assert_eq!(run.duration(), Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_in_memory_history() {
        let history = InMemoryHistory::new();
        let old = summary(PipelineName::IndexDailyClose, PipelineState::Completed, 10);
        let new = summary(
            PipelineName::IndexDailyClose,
            PipelineState::Skipped(StepName::CheckIndexDailyClose),
            1,
        );
        let other = summary(PipelineName::Financials, PipelineState::Completed, 5);
        for run in [&old, &new, &other] {
            history.save_run(run).await.unwrap();
        }

        let runs = history
            .list_runs(Some(PipelineName::IndexDailyClose), 10)
            .await
            .unwrap();
        assert_eq!(runs, vec![new.clone(), old.clone()]);

        assert_eq!(history.list_runs(None, 1).await.unwrap(), vec![new.clone()]);
        assert_eq!(history.load_run(other.run_id).await.unwrap(), Some(other));
        assert_eq!(
            history.list_pipelines().await.unwrap(),
            vec![PipelineName::IndexDailyClose, PipelineName::Financials]
        );
    }
}
