//! `stock-company-details-pipeline`: reference data for tickers seen in the
//! daily prices but not yet described

use super::{missing_endpoint, updated_at};
use crate::clients::{
    api::ApiClient,
    storage::{SqlRow, StorageClient},
};
use crate::core::{
    config::Settings,
    context::StepOutput,
    error::StepError,
    pipeline::{Pipeline, PipelineName},
    step::{Step, StepName, StepOutcome},
};
use crate::util::{
    csv_handler::{append_records, clean_temp_file, staged_path},
    sql_handler::try_query,
    SqlHandler,
};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Sort keys for the first ticker page; a random one spreads coverage
/// across runs limited by `max_pagination`
const SORT_FIELDS: [&str; 11] = [
    "ticker",
    "name",
    "market",
    "locale",
    "primary_exchange",
    "type",
    "currency_symbol",
    "cik",
    "composite_figi",
    "share_class_figi",
    "last_updated_utc",
];

pub struct StockCompanyDetailsPipeline;

impl Pipeline for StockCompanyDetailsPipeline {
    fn name(&self) -> PipelineName {
        PipelineName::StockCompanyDetails
    }

    fn build_steps(&self) -> Vec<StepName> {
        vec![
            StepName::ExtractStockCompanyDetails,
            StepName::Validate,
            StepName::LoadSql,
        ]
    }
}

pub struct StockCompanyDetailsExtractor {
    settings: Settings,
    storage: Arc<dyn StorageClient>,
    polygon: Arc<dyn ApiClient>,
}

impl StockCompanyDetailsExtractor {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn StorageClient>,
        polygon: Arc<dyn ApiClient>,
    ) -> Self {
        Self {
            settings,
            storage,
            polygon,
        }
    }

    /// Tickers present in the daily prices table
    async fn traded_tickers(&self) -> Result<Vec<String>, StepError> {
        let pipeline = PipelineName::StockDailyPrices.as_str();
        let prices = self
            .settings
            .config()
            .tables(pipeline)
            .first()
            .ok_or_else(|| StepError::MissingTableConfig {
                step: self.name(),
                pipeline: pipeline.to_string(),
            })?;
        let column = prices.field("T").map(|f| f.column.as_str()).unwrap_or("exchange_symbol");

        let sql = format!("SELECT DISTINCT {column} FROM {}", prices.qualified_name());
        let rows = try_query(self.storage.as_ref(), &sql).await.unwrap_or_default();
        Ok(first_column(rows))
    }
}

fn first_column(rows: Vec<SqlRow>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|value| value.as_str().map(String::from))
        .collect()
}

#[async_trait]
impl Step for StockCompanyDetailsExtractor {
    fn name(&self) -> StepName {
        StepName::ExtractStockCompanyDetails
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let table = self.settings.table(self.name())?.clone();
        let polygon = &self.settings.config().polygon;
        let endpoint = polygon
            .endpoint_url("stock_company_details")
            .ok_or_else(|| missing_endpoint("Polygon", "stock_company_details"))?;

        let file_path = staged_path(self.settings.temp_dir(), &table.file_stem());
        clean_temp_file(&file_path)?;

        let handler = SqlHandler::open(Arc::clone(&self.storage), table.clone()).await?;
        let ticker_column = handler.column_for("ticker").unwrap_or("exchange_symbol");
        let registered: HashSet<String> = first_column(
            handler
                .query(&format!(
                    "SELECT DISTINCT {ticker_column} FROM {}",
                    handler.qualified_name()
                ))
                .await?,
        )
        .into_iter()
        .collect();

        let mut required: HashSet<String> = self
            .traded_tickers()
            .await?
            .into_iter()
            .filter(|t| !registered.contains(t))
            .collect();
        info!(required = required.len(), registered = registered.len(), "Tickers to describe");

        if required.is_empty() {
            info!("No tickers to update");
            return Ok(StepOutcome::success(StepOutput::with_file_path(file_path)));
        }

        let sort = SORT_FIELDS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("ticker");
        let headers = table.headers();

        let mut body = self
            .polygon
            .request(&format!("{endpoint}&sort={sort}&market=stocks"))
            .await?;
        let (mut api_calls, mut rows) = (0u32, 0usize);

        while !required.is_empty() {
            api_calls += 1;

            let results = body.get("results").and_then(Value::as_array);
            let records: Vec<Map<String, Value>> = match results {
                Some(results) if !results.is_empty() => {
                    let stamp = updated_at();
                    results
                        .iter()
                        .filter_map(Value::as_object)
                        .filter_map(|company| {
                            let ticker = company.get("ticker").and_then(Value::as_str)?;
                            required.remove(ticker);
                            if registered.contains(ticker) {
                                return None;
                            }
                            let mut record = company.clone();
                            record.insert("updated_at".to_string(), Value::from(stamp.as_str()));
                            Some(record)
                        })
                        .collect()
                }
                _ => {
                    warn!(api_calls, "No data in response");
                    Vec::new()
                }
            };

            if !records.is_empty() {
                rows += append_records(&file_path, &headers, &records)?;
            }
            info!(api_calls, rows, remaining = required.len(), "Page processed");

            if required.is_empty() {
                break;
            }
            let Some(next_url) = body.get("next_url").and_then(Value::as_str) else {
                break;
            };
            if api_calls > polygon.max_pagination {
                info!(max_pagination = polygon.max_pagination, "Pagination limit reached");
                break;
            }
            let next_url = next_url.to_string();
            body = self.polygon.request(&next_url).await?;
        }

        info!(api_calls, rows, "Update finished");
        Ok(StepOutcome::success(StepOutput::with_file_path(file_path)))
    }
}
