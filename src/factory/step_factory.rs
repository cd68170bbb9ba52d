//! Step lookup by name, with the collaborators each step needs

use crate::clients::{
    api::{ApiClients, ApiKeys},
    storage::{self, StorageClient},
};
use crate::common_steps::{ManyValidator, SqlLoader, SqlManyLoader, Validator};
use crate::core::{
    config::Settings,
    context::StepOutput,
    error::{ConfigError, PipelineError},
    pipeline::StepProvider,
    step::{Step, StepName, StepOptions},
};
use crate::pipelines::{
    financials::{FinancialsChecker, FinancialsExtractor},
    index_daily_close::{IndexDailyCloseChecker, IndexDailyCloseExtractor},
    stock_company_details::StockCompanyDetailsExtractor,
    stock_daily_prices::StockDailyPricesExtractor,
};
use std::sync::Arc;
use tracing::debug;

/// Creates steps for one pipeline run
///
/// The storage client is opened once and shared by every step the factory
/// creates. API clients are only required by the steps that call them.
pub struct StepFactory {
    settings: Settings,
    storage: Arc<dyn StorageClient>,
    apis: ApiClients,
}

impl StepFactory {
    pub fn new(settings: Settings, storage: Arc<dyn StorageClient>, apis: ApiClients) -> Self {
        Self {
            settings,
            storage,
            apis,
        }
    }

    /// Open the configured storage client and build an API client per key
    pub async fn connect(settings: Settings, keys: &ApiKeys) -> Result<Self, PipelineError> {
        let storage = storage::connect(settings.config()).await?;
        let apis = ApiClients::from_keys(keys, settings.config())?;
        debug!(pipeline = %settings.pipeline, kind = %storage.kind(), ?apis, "Step factory ready");
        Ok(Self::new(settings, storage, apis))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The storage client shared by created steps
    pub fn storage(&self) -> Arc<dyn StorageClient> {
        Arc::clone(&self.storage)
    }

    /// Create a step from its kebab-case name
    pub fn create(
        &self,
        name: &str,
        previous_output: StepOutput,
        options: &StepOptions,
    ) -> Result<Box<dyn Step>, ConfigError> {
        let step: StepName = name.parse()?;
        self.create_step(step, previous_output, options)
    }
}

impl StepProvider for StepFactory {
    fn create_step(
        &self,
        name: StepName,
        previous_output: StepOutput,
        options: &StepOptions,
    ) -> Result<Box<dyn Step>, ConfigError> {
        let settings = self.settings.clone();
        let options = options.clone();

        let step: Box<dyn Step> = match name {
            StepName::ExtractStockDailyPrices => Box::new(StockDailyPricesExtractor::new(
                settings,
                self.storage(),
                self.apis.polygon()?,
            )),
            StepName::ExtractStockCompanyDetails => Box::new(StockCompanyDetailsExtractor::new(
                settings,
                self.storage(),
                self.apis.polygon()?,
            )),
            StepName::CheckIndexDailyClose => {
                Box::new(IndexDailyCloseChecker::new(settings, self.storage()))
            }
            StepName::ExtractIndexDailyClose => Box::new(IndexDailyCloseExtractor::new(
                previous_output,
                settings,
                self.apis.fred()?,
            )),
            StepName::CheckFinancialsTables => {
                Box::new(FinancialsChecker::new(settings, self.storage()))
            }
            StepName::ExtractFinancialsData => Box::new(FinancialsExtractor::new(
                previous_output,
                settings,
                self.apis.polygon()?,
            )),
            StepName::Validate => Box::new(Validator::new(previous_output, settings, options)),
            StepName::ValidateMany => {
                Box::new(ManyValidator::new(previous_output, settings, options))
            }
            StepName::LoadSql => Box::new(SqlLoader::new(
                previous_output,
                settings,
                self.storage(),
                options,
            )),
            StepName::LoadSqlMany => Box::new(SqlManyLoader::new(
                previous_output,
                settings,
                self.storage(),
                options,
            )),
        };
        Ok(step)
    }
}
