//! FRED (Federal Reserve Economic Data) client
//!
//! Requests carry `api_key` and `file_type=json`.

use crate::clients::api::ApiClient;
use crate::clients::http::{HttpSettings, RetryingHttp};
use crate::core::{config::FredConfig, error::ClientError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug)]
pub struct FredClient {
    api_key: String,
    http: RetryingHttp,
}

impl FredClient {
    pub fn new(api_key: impl Into<String>, config: &FredConfig) -> Result<Self, ClientError> {
        let http = RetryingHttp::new(HttpSettings {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            calls_per_min: 0,
        })?;

        Ok(Self {
            api_key: api_key.into(),
            http,
        })
    }

    fn with_key(&self, url: &str) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}api_key={}&file_type=json", self.api_key)
    }
}

#[async_trait]
impl ApiClient for FredClient {
    fn name(&self) -> &'static str {
        "FRED"
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

    #[tokio::test]
    async fn test_request_sends_key_and_json_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fred/series/observations"))
            .and(query_param("series_id", "SP500"))
            .and(query_param("api_key", "secret"))
            .and(query_param("file_type", "json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"observations": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = AppConfig::embedded().unwrap().fred;
        let client = FredClient::new("secret", &config).unwrap();
        let url = format!(
            "{}/fred/series/observations?series_id=SP500&observation_start=2024-01-02",
            server.uri()
        );
        let body = client.request(&url).await.unwrap();
        assert_eq!(body, json!({"observations": []}));
    }
}
