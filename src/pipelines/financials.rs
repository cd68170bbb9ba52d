//! `financials-pipeline`: Polygon financial statements, one table per
//! statement section

use super::{missing_endpoint, never_updated, parse_date, today, updated_at};
use crate::clients::{api::ApiClient, storage::StorageClient};
use crate::core::{
    config::{Settings, TableConfig},
    context::{StepOutput, TickerWindow},
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
use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reports are quarterly: a ticker is due once its next period has ended
const REPORT_INTERVAL_DAYS: i64 = 90;

pub struct FinancialsPipeline;

impl Pipeline for FinancialsPipeline {
    fn name(&self) -> PipelineName {
        PipelineName::Financials
    }

    fn build_steps(&self) -> Vec<StepName> {
        vec![
            StepName::CheckFinancialsTables,
            StepName::ExtractFinancialsData,
            StepName::ValidateMany,
            StepName::LoadSqlMany,
        ]
    }
}

/// Works out which tickers have a report due
pub struct FinancialsChecker {
    settings: Settings,
    storage: Arc<dyn StorageClient>,
}

impl FinancialsChecker {
    pub fn new(settings: Settings, storage: Arc<dyn StorageClient>) -> Self {
        Self { settings, storage }
    }

    async fn tickers(&self) -> Vec<String> {
        let financials = &self.settings.config().financials;
        let sql = format!(
            "SELECT DISTINCT {} FROM {}",
            financials.ticker_source_column, financials.ticker_source_table
        );
        match try_query(self.storage.as_ref(), &sql).await {
            Some(rows) => rows
                .into_iter()
                .filter_map(|row| row.into_iter().next())
                .filter_map(|value| value.as_str().map(String::from))
                .collect(),
            None => {
                warn!(table = %financials.ticker_source_table, "Ticker source not available");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Step for FinancialsChecker {
    fn name(&self) -> StepName {
        StepName::CheckFinancialsTables
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let table = self.settings.table(self.name())?.clone();
        let handler = SqlHandler::open(Arc::clone(&self.storage), table).await?;

        let symbol_column = handler
            .column_for("exchange_symbol_search")
            .unwrap_or("exchange_symbol_search");
        let end_column = handler.column_for("end_date").unwrap_or("end_date");
        let rows = handler
            .query(&format!(
                "SELECT {symbol_column}, MAX({end_column}) FROM {} GROUP BY {symbol_column}",
                handler.qualified_name()
            ))
            .await?;
        let stored: HashMap<String, NaiveDate> = rows
            .iter()
            .filter_map(|row| {
                let ticker = row.first()?.as_str()?;
                Some((ticker.to_string(), parse_date(row.get(1)?)?))
            })
            .collect();

        let today = today();
        let mut required = BTreeMap::new();
        for ticker in self.tickers().await {
            let last_date = stored.get(&ticker).copied().unwrap_or_else(never_updated);
            let next_date = last_date + Duration::days(REPORT_INTERVAL_DAYS);
            if next_date < today {
                required.insert(
                    ticker,
                    TickerWindow {
                        last_date,
                        next_date,
                    },
                );
            }
        }

        if required.is_empty() {
            info!("No financials due");
            return Ok(StepOutcome::success(StepOutput::skip()));
        }

        info!(tickers = required.len(), "Financials due");
        Ok(StepOutcome::success(StepOutput {
            required_tickers: Some(required),
            ..StepOutput::default()
        }))
    }
}

/// Fetches reports newer than each ticker's last stored period
pub struct FinancialsExtractor {
    previous_output: StepOutput,
    settings: Settings,
    polygon: Arc<dyn ApiClient>,
}

impl FinancialsExtractor {
    pub fn new(previous_output: StepOutput, settings: Settings, polygon: Arc<dyn ApiClient>) -> Self {
        Self {
            previous_output,
            settings,
            polygon,
        }
    }
}

/// Staged record of one report for one statement table
///
/// `fields` are copied from the report; `extra_fields` are read from the
/// statement section as `section[field].value`. Returns `None` when the
/// report has no such section.
fn statement_record(report: &Map<String, Value>, table: &TableConfig) -> Option<Map<String, Value>> {
    let path = table.endpoint_path.as_deref()?;
    let section = report.get("financials")?.get(path)?.as_object()?;

    let mut record = Map::new();
    for field in &table.fields {
        let value = report.get(&field.source).cloned().unwrap_or(Value::Null);
        record.insert(field.source.clone(), value);
    }
    for field in &table.extra_fields {
        let value = section
            .get(&field.source)
            .and_then(|item| item.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        record.insert(field.source.clone(), value);
    }
    Some(record)
}

/// Reports ending after `last_date`, tagged with the searched ticker
fn new_reports(
    results: &[Value],
    ticker: &str,
    last_date: NaiveDate,
    updated_at: &str,
) -> Vec<Map<String, Value>> {
    results
        .iter()
        .filter_map(Value::as_object)
        .filter(|report| {
            report
                .get("end_date")
                .and_then(Value::as_str)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .is_some_and(|end| end > last_date)
        })
        .map(|report| {
            let mut report = report.clone();
            report.insert("exchange_symbol_search".to_string(), Value::from(ticker));
            report.insert("updated_at".to_string(), Value::from(updated_at));
            report
        })
        .collect()
}

#[async_trait]
impl Step for FinancialsExtractor {
    fn name(&self) -> StepName {
        StepName::ExtractFinancialsData
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let required = self.previous_output.require_required_tickers(self.name())?;
        let config = self.settings.config();
        let endpoint = config
            .polygon
            .endpoint_url("financials")
            .ok_or_else(|| missing_endpoint("Polygon", "financials"))?;

        let tables = self.settings.pipeline_tables();
        let mut files_path: BTreeMap<String, PathBuf> = BTreeMap::new();
        for table in tables {
            let path = staged_path(self.settings.temp_dir(), &format!("financials_{}", table.name));
            clean_temp_file(&path)?;
            files_path.insert(table.name.clone(), path);
        }

        let max_tickers = config.financials.max_tickers;
        if required.len() > max_tickers {
            info!(required = required.len(), max_tickers, "Limiting tickers for this run");
        }

        let mut rows = 0;
        for (ticker, window) in required.iter().take(max_tickers) {
            let url = format!("{endpoint}ticker={ticker}&limit=100&include_sources=true");
            let body = self.polygon.request(&url).await?;
            let Some(results) = body.get("results").and_then(Value::as_array) else {
                debug!(%ticker, "No results");
                continue;
            };

            let reports = new_reports(results, ticker, window.last_date, &updated_at());
            for table in tables {
                let records: Vec<Map<String, Value>> = reports
                    .iter()
                    .filter_map(|report| statement_record(report, table))
                    .collect();
                if records.is_empty() {
                    continue;
                }
                if let Some(path) = files_path.get(&table.name) {
                    rows += append_records(path, &table.headers(), &records)?;
                }
            }
            info!(%ticker, reports = reports.len(), "Financials staged");
        }

        info!(rows, "Update finished");
        Ok(StepOutcome::success(StepOutput {
            files_path: Some(files_path),
            ..StepOutput::default()
        }))
    }
}
