//! Pipeline contract

use crate::core::{
    config::FailurePolicy,
    context::StepOutput,
    error::{ConfigError, PipelineError},
    state::RunReport,
    step::{Step, StepName, StepOptions},
};
use crate::execution::ExecutionEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every pipeline the factory knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineName {
    #[serde(rename = "stock-daily-prices-pipeline")]
    StockDailyPrices,
    #[serde(rename = "stock-company-details-pipeline")]
    StockCompanyDetails,
    #[serde(rename = "index-daily-close-pipeline")]
    IndexDailyClose,
    #[serde(rename = "financials-pipeline")]
    Financials,
}

impl PipelineName {
    pub const ALL: [PipelineName; 4] = [
        PipelineName::StockDailyPrices,
        PipelineName::StockCompanyDetails,
        PipelineName::IndexDailyClose,
        PipelineName::Financials,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineName::StockDailyPrices => "stock-daily-prices-pipeline",
            PipelineName::StockCompanyDetails => "stock-company-details-pipeline",
            PipelineName::IndexDailyClose => "index-daily-close-pipeline",
            PipelineName::Financials => "financials-pipeline",
        }
    }

    /// Names accepted by [`PipelineName::from_str`]
    pub fn allowed() -> Vec<String> {
        Self::ALL.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl fmt::Display for PipelineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|pipeline| pipeline.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidPipeline {
                pipeline: s.to_string(),
                allowed: Self::allowed(),
            })
    }
}

/// Builds the step instances a pipeline asks for
///
/// `StepFactory` is the production implementation; tests substitute their own.
pub trait StepProvider: Send + Sync {
    fn create_step(
        &self,
        name: StepName,
        previous_output: StepOutput,
        options: &StepOptions,
    ) -> Result<Box<dyn Step>, ConfigError>;
}

/// An ordered sequence of steps
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> PipelineName;

    /// Step names in execution order
    fn build_steps(&self) -> Vec<StepName>;

    /// Context forwarded to every step this pipeline creates
    fn step_options(&self) -> StepOptions {
        StepOptions::default()
    }

    /// Run every step in order, threading each output into the next step
    async fn run(
        &self,
        steps: &dyn StepProvider,
        policy: FailurePolicy,
    ) -> Result<RunReport, PipelineError> {
        ExecutionEngine::new(policy).execute(self, steps).await
    }
}
