//! Polygon.io client
//!
//! The key travels as the `apiKey` query parameter.

use crate::clients::api::ApiClient;
use crate::clients::http::{HttpSettings, RetryingHttp};
use crate::core::{config::PolygonConfig, error::ClientError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug)]
pub struct PolygonClient {
    api_key: String,
    http: RetryingHttp,
}

impl PolygonClient {
    pub fn new(api_key: impl Into<String>, config: &PolygonConfig) -> Result<Self, ClientError> {
        let http = RetryingHttp::new(HttpSettings {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            calls_per_min: config.calls_per_min,
        })?;

        Ok(Self {
            api_key: api_key.into(),
            http,
        })
    }

    fn with_key(&self, url: &str) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}apiKey={}", self.api_key)
    }
}

#[async_trait]
impl ApiClient for PolygonClient {
    fn name(&self) -> &'static str {
        "Polygon"
    }

    async fn request(&self, url: &str) -> Result<Value, ClientError> {
        self.http.get_json(&self.with_key(url), url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> PolygonConfig {
        let mut config = AppConfig::embedded().unwrap().polygon;
        config.calls_per_min = 0;
        config.retry_backoff_secs = 0;
        config.max_retries = 1;
        config
    }

    #[test]
    fn test_key_appended_with_right_separator() {
        let client = PolygonClient::new("k", &config()).unwrap();
        assert_eq!(client.with_key("https://x/a?b=1"), "https://x/a?b=1&apiKey=k");
        assert_eq!(client.with_key("https://x/a"), "https://x/a?apiKey=k");
    }

    #[tokio::test]
    async fn test_request_sends_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/aggs/grouped/locale/us/market/stocks/2024-01-02"))
            .and(query_param("adjusted", "true"))
            .and(query_param("apiKey", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultsCount": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let client = PolygonClient::new("secret", &config()).unwrap();
        let url = format!(
            "{}/v2/aggs/grouped/locale/us/market/stocks/2024-01-02?adjusted=true",
            server.uri()
        );
        let body = client.request(&url).await.unwrap();
        assert_eq!(body["resultsCount"], 0);
    }

    #[tokio::test]
    async fn test_errors_do_not_leak_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = PolygonClient::new("secret", &config()).unwrap();
        let err = client.request(&format!("{}/x?a=1", server.uri())).await.unwrap_err();
        assert!(matches!(err, ClientError::MaxRetriesExceeded { max_retries: 1, .. }));
        assert!(!err.to_string().contains("secret"));
    }
}
