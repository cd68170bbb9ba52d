//! Runs the resolved pipelines one after another

use crate::core::{AppConfig, PipelineError, PipelineName, RunReport, Settings};
use crate::persistence::{HistoryBackend, RunSummary};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Builds and runs a single pipeline for the batch
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, settings: Settings) -> Result<RunReport, PipelineError>;
}

/// Run `pipelines` in order, saving a summary of every run to `history`
///
/// A pipeline that finishes with a report, whatever its status, lets the
/// batch continue. A `PipelineError` stops the batch: the failed run is saved
/// when it got far enough to have a report, and the error is returned.
pub async fn run_batch(
    pipelines: &[PipelineName],
    config: &Arc<AppConfig>,
    runner: &dyn PipelineRunner,
    history: &dyn HistoryBackend,
) -> Result<Vec<RunReport>> {
    let mut reports = Vec::with_capacity(pipelines.len());

    for name in pipelines {
        let settings = Settings::new(name.as_str(), Arc::clone(config));
        match runner.run(settings).await {
            Ok(report) => {
                history.save_run(&RunSummary::from(&report)).await?;
                reports.push(report);
            }
            Err(err) => {
                error!(pipeline = %name, error = %err, "Pipeline failed, stopping batch");
                if let Some(report) = err.report() {
                    if let Err(save_err) = history.save_run(&RunSummary::from(report)).await {
                        warn!(run_id = %report.run_id, error = %save_err, "Failed to save run");
                    }
                }
                return Err(err.into());
            }
        }
    }

    info!(pipelines = reports.len(), "Batch finished");
    Ok(reports)
}
