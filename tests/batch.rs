//! Running several pipelines in a row

mod helpers;

use async_trait::async_trait;
use helpers::*;
use market_pipeline::core::{
    FailurePolicy, Pipeline, PipelineError, PipelineName, PipelineState, RunReport, Settings,
    StepError, StepName, StepOutcome, StepOutput,
};
use market_pipeline::execution::{run_batch, PipelineRunner};
use market_pipeline::persistence::{HistoryBackend, InMemoryHistory, SqliteHistoryStore};
use std::sync::{Arc, Mutex};

const STEPS: [StepName; 2] = [StepName::Validate, StepName::LoadSql];

/// Two-step pipelines; one may error at load-sql, one may report a failed validation
#[derive(Default)]
struct ScriptedRunner {
    erroring: Option<PipelineName>,
    reporting_failure: Option<PipelineName>,
    started: Mutex<Vec<PipelineName>>,
}

impl ScriptedRunner {
    fn started(&self) -> Vec<PipelineName> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineRunner for ScriptedRunner {
    async fn run(&self, settings: Settings) -> Result<RunReport, PipelineError> {
        let name: PipelineName = settings.pipeline.parse()?;
        self.started.lock().unwrap().push(name);

        let mut provider = ScriptedProvider::new();
        if self.erroring == Some(name) {
            provider = provider.script(StepName::LoadSql, |_| {
                Err(StepError::InvalidData("duplicate key".to_string()))
            });
        }
        if self.reporting_failure == Some(name) {
            provider = provider.script(StepName::Validate, |_| {
                Ok(StepOutcome::failure(StepOutput::default()))
            });
        }

        ListedPipeline::named(name, &STEPS)
            .run(&provider, FailurePolicy::AbortOnFailure)
            .await
    }
}

fn shared_config(dir: &tempfile::TempDir) -> Arc<market_pipeline::AppConfig> {
    Arc::new(test_config(dir.path()))
}

#[tokio::test]
async fn test_step_error_stops_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let history = InMemoryHistory::new();
    let runner = ScriptedRunner {
        erroring: Some(PipelineName::StockCompanyDetails),
        ..ScriptedRunner::default()
    };

    let err = run_batch(&PipelineName::ALL, &shared_config(&dir), &runner, &history)
        .await
        .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Step { pipeline, step, .. }) => {
            assert_eq!(*pipeline, PipelineName::StockCompanyDetails);
            assert_eq!(*step, StepName::LoadSql);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Later pipelines are never started
    assert_eq!(
        runner.started(),
        vec![PipelineName::StockDailyPrices, PipelineName::StockCompanyDetails]
    );

    let runs = history.list_runs(None, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    let failed = history
        .list_runs(Some(PipelineName::StockCompanyDetails), 1)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(failed.status, PipelineState::Failed(StepName::LoadSql));
    assert_eq!(failed.completed_steps, 2);
    assert_eq!(failed.failed_steps, 1);
}

#[tokio::test]
async fn test_reported_failure_keeps_the_batch_going() {
    let dir = tempfile::tempdir().unwrap();
    let history = InMemoryHistory::new();
    let runner = ScriptedRunner {
        reporting_failure: Some(PipelineName::StockDailyPrices),
        ..ScriptedRunner::default()
    };

    let reports = run_batch(&PipelineName::ALL, &shared_config(&dir), &runner, &history)
        .await
        .unwrap();

    assert_eq!(runner.started(), PipelineName::ALL.to_vec());
    assert_eq!(reports.len(), 4);
    assert_eq!(reports[0].status, PipelineState::Failed(StepName::Validate));
    assert!(reports[1..].iter().all(|report| report.succeeded()));
    assert_eq!(history.list_runs(None, 10).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_failed_run_is_stored_in_sqlite_history() {
    let dir = tempfile::tempdir().unwrap();
    let history = SqliteHistoryStore::in_memory().await.unwrap();
    let runner = ScriptedRunner {
        erroring: Some(PipelineName::StockDailyPrices),
        ..ScriptedRunner::default()
    };

    let err = run_batch(&PipelineName::ALL, &shared_config(&dir), &runner, &history)
        .await
        .unwrap_err();
    let run_id = err
        .downcast_ref::<PipelineError>()
        .and_then(PipelineError::report)
        .map(|report| report.run_id)
        .unwrap();

    let stored = history.load_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.pipeline, PipelineName::StockDailyPrices);
    assert_eq!(stored.status, PipelineState::Failed(StepName::LoadSql));
    assert_eq!(stored.total_steps, 2);
    assert_eq!(runner.started(), vec![PipelineName::StockDailyPrices]);
}
