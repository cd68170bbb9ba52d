//! Pipeline lookup by name

use crate::core::{
    config::Settings,
    error::ConfigError,
    pipeline::{Pipeline, PipelineName},
};
use crate::pipelines::{
    FinancialsPipeline, IndexDailyClosePipeline, StockCompanyDetailsPipeline,
    StockDailyPricesPipeline,
};
use tracing::debug;

/// Builds the pipeline named in `Settings::pipeline`
pub struct PipelineFactory {
    settings: Settings,
}

impl PipelineFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fails with `InvalidPipeline`, listing every known name, when the
    /// requested pipeline does not exist
    pub fn create(&self) -> Result<Box<dyn Pipeline>, ConfigError> {
        let name: PipelineName = self.settings.pipeline.parse()?;
        debug!(pipeline = %name, "Creating pipeline");

        Ok(match name {
            PipelineName::StockDailyPrices => Box::new(StockDailyPricesPipeline),
            PipelineName::StockCompanyDetails => Box::new(StockCompanyDetailsPipeline),
            PipelineName::IndexDailyClose => Box::new(IndexDailyClosePipeline),
            PipelineName::Financials => Box::new(FinancialsPipeline),
        })
    }
}
