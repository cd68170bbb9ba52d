//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use market_pipeline::clients::{sqlite::SqliteClient, StorageClient};
use market_pipeline::core::{
    config::AppConfig, ConfigError, Pipeline, PipelineName, RunReport, Settings, Step, StepError,
    StepName, StepOptions, StepOutcome, StepOutput, StepProvider,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Pipeline with a fixed step list
pub struct ListedPipeline {
    pub name: PipelineName,
    pub steps: Vec<StepName>,
}

impl ListedPipeline {
    pub fn new(steps: &[StepName]) -> Self {
        Self::named(PipelineName::IndexDailyClose, steps)
    }

    pub fn named(name: PipelineName, steps: &[StepName]) -> Self {
        Self {
            name,
            steps: steps.to_vec(),
        }
    }
}

impl Pipeline for ListedPipeline {
    fn name(&self) -> PipelineName {
        self.name
    }

    fn build_steps(&self) -> Vec<StepName> {
        self.steps.clone()
    }
}

type Behaviour = Arc<dyn Fn(&StepOutput) -> Result<StepOutcome, StepError> + Send + Sync>;

/// Step whose result is computed from the output it was created with
pub struct ScriptedStep {
    name: StepName,
    previous_output: StepOutput,
    behaviour: Behaviour,
    runs: Arc<Mutex<Vec<StepName>>>,
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> StepName {
        self.name
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        self.runs.lock().unwrap().push(self.name);
        (self.behaviour)(&self.previous_output)
    }
}

/// Provider recording every creation and run
///
/// Steps without a script succeed with an empty output.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: HashMap<StepName, Behaviour>,
    created: Mutex<Vec<(StepName, StepOutput)>>,
    runs: Arc<Mutex<Vec<StepName>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<F>(mut self, step: StepName, behaviour: F) -> Self
    where
        F: Fn(&StepOutput) -> Result<StepOutcome, StepError> + Send + Sync + 'static,
    {
        self.scripts.insert(step, Arc::new(behaviour));
        self
    }

    /// Steps in creation order, with the output each was created from
    pub fn created(&self) -> Vec<(StepName, StepOutput)> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_names(&self) -> Vec<StepName> {
        self.created().into_iter().map(|(name, _)| name).collect()
    }

    pub fn runs(&self) -> Vec<StepName> {
        self.runs.lock().unwrap().clone()
    }
}

impl StepProvider for ScriptedProvider {
    fn create_step(
        &self,
        name: StepName,
        previous_output: StepOutput,
        _options: &StepOptions,
    ) -> Result<Box<dyn Step>, ConfigError> {
        self.created
            .lock()
            .unwrap()
            .push((name, previous_output.clone()));

        let behaviour: Behaviour = match self.scripts.get(&name) {
            Some(behaviour) => Arc::clone(behaviour),
            None => Arc::new(|_: &StepOutput| {
                Ok::<_, StepError>(StepOutcome::success(StepOutput::default()))
            }),
        };

        Ok(Box::new(ScriptedStep {
            name,
            previous_output,
            behaviour,
            runs: Arc::clone(&self.runs),
        }))
    }
}

/// Embedded configuration staging into `temp`
pub fn test_config(temp: &Path) -> AppConfig {
    let mut config = AppConfig::embedded().unwrap();
    config.temp_dir = temp.to_path_buf();
    config
}

pub async fn in_memory_storage(config: &AppConfig) -> Arc<dyn StorageClient> {
    Arc::new(SqliteClient::in_memory(&config.schemas).await.unwrap())
}

pub fn settings(pipeline: PipelineName, config: AppConfig) -> Settings {
    Settings::new(pipeline.as_str(), Arc::new(config))
}

pub async fn count_rows(storage: &Arc<dyn StorageClient>, table: &str) -> i64 {
    let rows = storage
        .execute(&format!("SELECT COUNT(*) FROM {table}"))
        .await
        .unwrap();
    rows[0][0].as_i64().unwrap()
}

pub fn step_names(report: &RunReport) -> Vec<StepName> {
    report.steps.iter().map(|s| s.name).collect()
}
