//! `index-daily-close-pipeline`: FRED index observations

use super::{missing_endpoint, never_updated, parse_date, today, updated_at};
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
    SqlHandler,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

pub struct IndexDailyClosePipeline;

impl Pipeline for IndexDailyClosePipeline {
    fn name(&self) -> PipelineName {
        PipelineName::IndexDailyClose
    }

    fn build_steps(&self) -> Vec<StepName> {
        vec![
            StepName::CheckIndexDailyClose,
            StepName::ExtractIndexDailyClose,
            StepName::Validate,
            StepName::LoadSql,
        ]
    }
}

/// Finds the last stored date of every configured index and skips the
/// pipeline when all of them are current
pub struct IndexDailyCloseChecker {
    settings: Settings,
    storage: Arc<dyn StorageClient>,
}

impl IndexDailyCloseChecker {
    pub fn new(settings: Settings, storage: Arc<dyn StorageClient>) -> Self {
        Self { settings, storage }
    }
}

#[async_trait]
impl Step for IndexDailyCloseChecker {
    fn name(&self) -> StepName {
        StepName::CheckIndexDailyClose
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let table = self.settings.table(self.name())?.clone();
        let handler = SqlHandler::open(Arc::clone(&self.storage), table).await?;

        let index_column = handler.column_for("index").unwrap_or("index_code");
        let date_column = handler.column_for("date").unwrap_or("date");
        let rows = handler
            .query(&format!(
                "SELECT {index_column}, MAX({date_column}) FROM {} GROUP BY {index_column}",
                handler.qualified_name()
            ))
            .await?;

        let stored: HashMap<String, NaiveDate> = rows
            .iter()
            .filter_map(|row| {
                let index = row.first()?.as_str()?;
                let date = parse_date(row.get(1)?)?;
                Some((index.to_string(), date))
            })
            .collect();

        let last_update: BTreeMap<String, NaiveDate> = self
            .settings
            .config()
            .fred
            .indexes
            .iter()
            .map(|index| {
                let date = stored.get(index).copied().unwrap_or_else(never_updated);
                (index.clone(), date)
            })
            .collect();

        let Some(oldest) = last_update.values().min().copied() else {
            info!("No indexes configured");
            return Ok(StepOutcome::success(StepOutput::skip()));
        };

        let days_past = (today() - oldest).num_days();
        if days_past > 0 {
            info!(days_past, %oldest, "Indexes to update");
            Ok(StepOutcome::success(StepOutput {
                indexes_last_update: Some(last_update),
                ..StepOutput::default()
            }))
        } else {
            info!("Indexes up to date");
            Ok(StepOutcome::success(StepOutput::skip()))
        }
    }
}

/// Requests observations after each index's last stored date
pub struct IndexDailyCloseExtractor {
    previous_output: StepOutput,
    settings: Settings,
    fred: Arc<dyn ApiClient>,
}

impl IndexDailyCloseExtractor {
    pub fn new(previous_output: StepOutput, settings: Settings, fred: Arc<dyn ApiClient>) -> Self {
        Self {
            previous_output,
            settings,
            fred,
        }
    }
}

/// One staged record per observation; values without a digit (FRED's `.`)
/// become null
fn observation_records(
    observations: &[Value],
    index: &str,
    has_digit: &Regex,
    updated_at: &str,
) -> Vec<Map<String, Value>> {
    observations
        .iter()
        .map(|observation| {
            let raw = observation.get("value").and_then(Value::as_str).unwrap_or("");
            let value = if has_digit.is_match(raw) {
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            };

            let mut record = Map::new();
            record.insert(
                "date".to_string(),
                observation.get("date").cloned().unwrap_or(Value::Null),
            );
            record.insert("index".to_string(), Value::from(index));
            record.insert("value".to_string(), value);
            record.insert("updated_at".to_string(), Value::from(updated_at));
            record
        })
        .collect()
}

#[async_trait]
impl Step for IndexDailyCloseExtractor {
    fn name(&self) -> StepName {
        StepName::ExtractIndexDailyClose
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let last_update = self.previous_output.require_indexes_last_update(self.name())?;
        let table = self.settings.table(self.name())?;
        let fred = &self.settings.config().fred;
        let endpoint = fred
            .endpoint_url("index_daily_close")
            .ok_or_else(|| missing_endpoint("FRED", "index_daily_close"))?;
        let has_digit = Regex::new(r"\d").map_err(|e| StepError::InvalidData(e.to_string()))?;

        let file_path = staged_path(self.settings.temp_dir(), &table.file_stem());
        clean_temp_file(&file_path)?;
        let headers = table.headers();

        let mut rows = 0;
        for index in &fred.indexes {
            let last_date = last_update
                .get(index)
                .ok_or_else(|| StepError::MissingInput {
                    step: StepName::ExtractIndexDailyClose,
                    key: format!("indexes_last_update.{index}"),
                })?;
            let start = *last_date + Duration::days(1);
            let url = format!("{endpoint}series_id={index}&observation_start={start}");

            let body = self.fred.request(&url).await?;
            let observations = body
                .get("observations")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let records = observation_records(observations, index, &has_digit, &updated_at());
            let written = append_records(&file_path, &headers, &records)?;
            rows += written;
            info!(%index, %start, rows = written, "Observations staged");
        }

        info!(rows, "Update finished");
        Ok(StepOutcome::success(StepOutput::with_file_path(file_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::mock::{config, setup, MockApi};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_observation_records() {
        let has_digit = Regex::new(r"\d").unwrap();
        let observations = vec![
            json!({"date": "2024-01-02", "value": "4742.83"}),
            json!({"date": "2024-01-03", "value": "."}),
        ];

        let records = observation_records(&observations, "SP500", &has_digit, "now");
        assert_eq!(records[0]["value"], json!(4742.83));
        assert_eq!(records[0]["index"], "SP500");
        assert_eq!(records[1]["value"], Value::Null);
        assert_eq!(records[1]["date"], "2024-01-03");
    }

    #[tokio::test]
    async fn test_checker_defaults_unseen_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, storage) = setup(config(dir.path()), "index-daily-close-pipeline").await;

        let table = settings.pipeline_tables()[0].clone();
        let handler = SqlHandler::open(Arc::clone(&storage), table).await.unwrap();
        handler
            .insert_into(
                &["date".to_string(), "index".to_string()],
                &[
                    vec!["2024-01-02".to_string(), "SP500".to_string()],
                    vec!["2024-01-05".to_string(), "SP500".to_string()],
                ],
            )
            .await
            .unwrap();

        let mut step = IndexDailyCloseChecker::new(settings, storage);
        let outcome = step.run().await.unwrap();
        assert!(!outcome.output.skip_pipeline);

        let last_update = outcome.output.indexes_last_update.unwrap();
        assert_eq!(last_update.len(), 7);
        assert_eq!(last_update["SP500"], date(2024, 1, 5));
        assert_eq!(last_update["DJIA"], never_updated());
    }

    #[tokio::test]
    async fn test_checker_skips_when_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.fred.indexes = vec!["SP500".to_string()];
        let (settings, storage) = setup(config, "index-daily-close-pipeline").await;

        let table = settings.pipeline_tables()[0].clone();
        let handler = SqlHandler::open(Arc::clone(&storage), table).await.unwrap();
        handler
            .insert_into(
                &["date".to_string(), "index".to_string()],
                &[vec![today().to_string(), "SP500".to_string()]],
            )
            .await
            .unwrap();

        let mut step = IndexDailyCloseChecker::new(settings, storage);
        let outcome = step.run().await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.skip_pipeline);
    }

    #[tokio::test]
    async fn test_extractor_requests_from_next_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.fred.indexes = vec!["SP500".to_string(), "DJIA".to_string()];
        let (settings, _) = setup(config, "index-daily-close-pipeline").await;

        let previous = StepOutput {
            indexes_last_update: Some(BTreeMap::from([
                ("SP500".to_string(), date(2024, 1, 2)),
                ("DJIA".to_string(), date(2024, 1, 4)),
            ])),
            ..StepOutput::default()
        };
        let api = Arc::new(MockApi::default().route(
            "series_id=SP500",
            json!({"observations": [{"date": "2024-01-03", "value": "4704.81"}]}),
        ));

        let mut step = IndexDailyCloseExtractor::new(previous, settings, api.clone());
        let outcome = step.run().await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                "https://api.stlouisfed.org/fred/series/observations?series_id=SP500&observation_start=2024-01-03",
                "https://api.stlouisfed.org/fred/series/observations?series_id=DJIA&observation_start=2024-01-05",
            ]
        );
        let staged = std::fs::read_to_string(outcome.output.file_path.unwrap()).unwrap();
        assert!(staged.starts_with("date,index,value,updated_at\n2024-01-03,SP500,4704.81,"));
        assert_eq!(staged.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_extractor_needs_checker_output() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, _) = setup(config(dir.path()), "index-daily-close-pipeline").await;

        let mut step =
            IndexDailyCloseExtractor::new(StepOutput::default(), settings, Arc::new(MockApi::default()));
        let err = step.run().await.unwrap_err();
        assert!(matches!(err, StepError::MissingInput { .. }));
    }
}
