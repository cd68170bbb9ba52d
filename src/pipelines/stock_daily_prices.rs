//! `stock-daily-prices-pipeline`: grouped daily OHLC bars from Polygon

use super::{missing_endpoint, parse_date, today, updated_at, DATETIME_FORMAT};
use crate::clients::{api::ApiClient, storage::StorageClient};
use crate::core::{
    config::Settings,
    context::StepOutput,
    error::StepError,
    pipeline::{Pipeline, PipelineName},
    step::{Step, StepName, StepOutcome},
};
use crate::util::{
    csv_handler::{append_records, clean_temp_file, staged_path},
    sql_handler::scalar,
    SqlHandler,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Weekday};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

pub struct StockDailyPricesPipeline;

impl Pipeline for StockDailyPricesPipeline {
    fn name(&self) -> PipelineName {
        PipelineName::StockDailyPrices
    }

    fn build_steps(&self) -> Vec<StepName> {
        vec![
            StepName::ExtractStockDailyPrices,
            StepName::Validate,
            StepName::LoadSql,
        ]
    }
}

/// Fetches one grouped-daily page per weekday since the last stored date
pub struct StockDailyPricesExtractor {
    settings: Settings,
    storage: Arc<dyn StorageClient>,
    polygon: Arc<dyn ApiClient>,
}

impl StockDailyPricesExtractor {
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

    /// Latest stored date, or `max_days_hist + 1` days ago for an empty table
    async fn last_date(&self, handler: &SqlHandler) -> Result<NaiveDate, StepError> {
        let date_column = handler.column_for("date").unwrap_or("date");
        let sql = format!("SELECT MAX({date_column}) FROM {}", handler.qualified_name());
        let rows = handler.query(&sql).await?;

        match scalar(&rows).and_then(parse_date) {
            Some(date) => Ok(date),
            None => {
                info!(table = %handler.qualified_name(), "Table empty");
                let max_days_hist = self.settings.config().polygon.max_days_hist;
                Ok(today() - Duration::days(max_days_hist + 1))
            }
        }
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Millisecond `t` to a datetime string, plus `date` and `updated_at`
fn enrich(results: &[Value], date: NaiveDate, updated_at: &str) -> Vec<Map<String, Value>> {
    results
        .iter()
        .filter_map(Value::as_object)
        .map(|bar| {
            let mut record = bar.clone();
            if let Some(ts) = bar.get("t").and_then(Value::as_i64) {
                if let Some(dt) = DateTime::from_timestamp_millis(ts) {
                    record.insert("t".to_string(), Value::from(dt.format(DATETIME_FORMAT).to_string()));
                }
            }
            record.insert("date".to_string(), Value::from(date.to_string()));
            record.insert("updated_at".to_string(), Value::from(updated_at));
            record
        })
        .collect()
}

#[async_trait]
impl Step for StockDailyPricesExtractor {
    fn name(&self) -> StepName {
        StepName::ExtractStockDailyPrices
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let table = self.settings.table(self.name())?.clone();
        let polygon = &self.settings.config().polygon;
        let endpoint = polygon
            .endpoint_url("stock_daily_prices")
            .ok_or_else(|| missing_endpoint("Polygon", "stock_daily_prices"))?;

        let handler = SqlHandler::open(Arc::clone(&self.storage), table.clone()).await?;
        let last_date = self.last_date(&handler).await?;
        let until = polygon.update_until.unwrap_or_else(today);
        info!(%last_date, %until, "Extracting daily prices");

        let file_path = staged_path(self.settings.temp_dir(), &table.file_stem());
        clean_temp_file(&file_path)?;
        let headers = table.headers();

        let (mut api_calls, mut rows) = (0usize, 0usize);
        let mut date = last_date + Duration::days(1);
        while date < until {
            if !is_weekend(date) {
                let url = format!("{endpoint}{date}?adjusted=true");
                let body = self.polygon.request(&url).await?;
                api_calls += 1;

                if let Some(results) = body.get("results").and_then(Value::as_array) {
                    let records = enrich(results, date, &updated_at());
                    rows += append_records(&file_path, &headers, &records)?;
                    info!(%date, rows, "Request successful");
                }
            }
            date += Duration::days(1);
        }

        info!(api_calls, rows, "Update finished");
        Ok(StepOutcome::success(StepOutput::with_file_path(file_path)))
    }
}
