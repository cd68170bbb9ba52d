//! Whole pipelines against mocked Polygon and FRED APIs and an in-memory
//! database

mod helpers;

use helpers::*;
use market_pipeline::clients::{
    fred::FredClient, polygon::PolygonClient, ApiClient, ApiClients, StorageClient,
};
use market_pipeline::core::{config::AppConfig, FailurePolicy, PipelineName, PipelineState, StepName};
use market_pipeline::util::SqlHandler;
use market_pipeline::{PipelineFactory, StepFactory};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TABLE: &str = "bronze_layer.INDEX_DAILY_CLOSE";
const PRICES_TABLE: &str = "bronze_layer.STOCK_DAILY_PRICES";

fn fred_config(server: &MockServer, temp: &Path) -> AppConfig {
    let mut config = test_config(temp);
    config.fred.base_url = format!("{}/", server.uri());
    config.fred.indexes = vec!["SP500".to_string()];
    config.fred.retry_backoff_secs = 0;
    config
}

fn factory(config: &AppConfig, storage: Arc<dyn StorageClient>) -> StepFactory {
    let fred: Arc<dyn ApiClient> = Arc::new(FredClient::new("test-key", &config.fred).unwrap());
    StepFactory::new(
        settings(PipelineName::IndexDailyClose, config.clone()),
        storage,
        ApiClients::new(None, Some(fred)),
    )
}

async fn observations(server: &MockServer, start: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("series_id", "SP500"))
        .and(query_param("observation_start", start))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_index_pipeline_loads_and_reruns_cleanly() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = fred_config(&server, dir.path());
    let storage = in_memory_storage(&config).await;

    observations(
        &server,
        "1600-01-02",
        json!({"observations": [
            {"date": "2024-01-02", "value": "4742.83"},
            {"date": "2024-01-03", "value": "."},
            {"date": "not-a-date", "value": "1.0"}
        ]}),
    )
    .await;
    observations(&server, "2024-01-04", json!({"observations": []})).await;

    let factory = factory(&config, Arc::clone(&storage));
    let pipeline = PipelineFactory::new(factory.settings().clone())
        .create()
        .unwrap();

    let first = pipeline.run(&factory, FailurePolicy::Continue).await.unwrap();
    assert_eq!(first.status, PipelineState::Completed);
    assert_eq!(step_names(&first), pipeline.build_steps());
    assert_eq!(count_rows(&storage, TABLE).await, 2);

    let nulls = storage
        .execute(&format!("SELECT COUNT(*) FROM {TABLE} WHERE close_value IS NULL"))
        .await
        .unwrap();
    assert_eq!(nulls[0][0].as_i64(), Some(1));

    // Staging files are cleaned; the rejected row is kept for inspection
    let invalid = std::fs::read_to_string(dir.path().join("index_daily_close_temp_invalid.csv")).unwrap();
    assert!(invalid.contains("not-a-date"));
    assert!(!dir.path().join("index_daily_close_temp.csv").exists());
    assert!(!dir.path().join("index_daily_close_temp_valid.csv").exists());

    // Second run asks only for newer data and adds nothing
    let second = pipeline.run(&factory, FailurePolicy::Continue).await.unwrap();
    assert!(second.succeeded());
    assert_eq!(count_rows(&storage, TABLE).await, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_index_pipeline_skips_when_up_to_date() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = fred_config(&server, dir.path());
    let storage = in_memory_storage(&config).await;

    let today = chrono::Local::now().date_naive().to_string();
    let table = config.tables(PipelineName::IndexDailyClose.as_str())[0].clone();
    SqlHandler::open(Arc::clone(&storage), table)
        .await
        .unwrap()
        .insert_into(
            &["date".to_string(), "index".to_string()],
            &[vec![today, "SP500".to_string()]],
        )
        .await
        .unwrap();

    let factory = factory(&config, Arc::clone(&storage));
    let pipeline = PipelineFactory::new(factory.settings().clone())
        .create()
        .unwrap();
    let report = pipeline.run(&factory, FailurePolicy::Continue).await.unwrap();

    assert_eq!(report.status, PipelineState::Skipped(StepName::CheckIndexDailyClose));
    assert_eq!(report.steps.len(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(count_rows(&storage, TABLE).await, 1);
}

#[tokio::test]
async fn test_api_failure_aborts_with_step_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = fred_config(&server, dir.path());
    config.fred.max_retries = 1;
    let storage = in_memory_storage(&config).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let factory = factory(&config, Arc::clone(&storage));
    let pipeline = PipelineFactory::new(factory.settings().clone())
        .create()
        .unwrap();
    let err = pipeline
        .run(&factory, FailurePolicy::Continue)
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("extract-index-daily-close"), "{message}");
    assert!(!message.contains("test-key"), "key leaked: {message}");
    assert_eq!(count_rows(&storage, TABLE).await, 0);
}

fn polygon_config(server: &MockServer, temp: &Path) -> AppConfig {
    let mut config = test_config(temp);
    config.polygon.base_url = format!("{}/", server.uri());
    config.polygon.calls_per_min = 0;
    config.polygon.retry_backoff_secs = 0;
    config.polygon.update_until = chrono::NaiveDate::from_ymd_opt(2024, 1, 8);
    config
}

async fn grouped_daily(server: &MockServer, date: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/aggs/grouped/locale/us/market/stocks/{date}")))
        .and(query_param("adjusted", "true"))
        .and(query_param("apiKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_stock_prices_rerun_inserts_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = polygon_config(&server, dir.path());
    let storage = in_memory_storage(&config).await;

    let table = config.tables(PipelineName::StockDailyPrices.as_str())[0].clone();
    SqlHandler::open(Arc::clone(&storage), table)
        .await
        .unwrap()
        .insert_into(
            &["T".to_string(), "c".to_string(), "date".to_string()],
            &[vec!["AAPL".to_string(), "184.25".to_string(), "2024-01-03".to_string()]],
        )
        .await
        .unwrap();

    grouped_daily(
        &server,
        "2024-01-04",
        json!({"results": [
            {"T": "AAPL", "c": 181.91, "t": 1704402000000i64},
            {"T": "MSFT", "c": 367.75, "t": 1704402000000i64}
        ]}),
    )
    .await;
    grouped_daily(
        &server,
        "2024-01-05",
        json!({"results": [{"T": "AAPL", "c": 181.18, "t": 1704488400000i64}]}),
    )
    .await;

    let polygon: Arc<dyn ApiClient> =
        Arc::new(PolygonClient::new("test-key", &config.polygon).unwrap());
    let factory = StepFactory::new(
        settings(PipelineName::StockDailyPrices, config.clone()),
        Arc::clone(&storage),
        ApiClients::new(Some(polygon), None),
    );
    let pipeline = PipelineFactory::new(factory.settings().clone())
        .create()
        .unwrap();

    let first = pipeline.run(&factory, FailurePolicy::Continue).await.unwrap();
    assert_eq!(first.status, PipelineState::Completed);
    assert_eq!(count_rows(&storage, PRICES_TABLE).await, 4);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    // Resumes after 2024-01-05; the weekend before the cut-off needs no request
    let second = pipeline.run(&factory, FailurePolicy::Continue).await.unwrap();
    assert_eq!(second.status, PipelineState::Completed);
    assert_eq!(count_rows(&storage, PRICES_TABLE).await, 4);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
