//! Shared HTTP transport for the REST API clients
//!
//! One GET loop with a request timeout, optional per-minute throttling and a
//! fixed backoff between attempts. Only `200 OK` counts as success.

use crate::core::error::ClientError;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry, throttle and timeout settings of one API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
    /// 0 disables throttling
    pub calls_per_min: u32,
}

impl HttpSettings {
    /// Minimum spacing between two requests
    fn min_interval(&self) -> Option<Duration> {
        (self.calls_per_min > 0).then(|| Duration::from_secs(60) / self.calls_per_min)
    }
}

/// GET-and-parse-JSON client with retries
#[derive(Debug)]
pub struct RetryingHttp {
    client: reqwest::Client,
    settings: HttpSettings,
    last_call: Mutex<Option<Instant>>,
}

impl RetryingHttp {
    pub fn new(settings: HttpSettings) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            settings,
            last_call: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Wait until the next call is allowed
    async fn throttle(&self) {
        let Some(interval) = self.settings.min_interval() else {
            return;
        };

        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let ready_at = last + interval;
            if ready_at > Instant::now() {
                debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "Throttling");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// GET `url` and parse the body as JSON
    ///
    /// `display_url` is what ends up in logs and errors; callers pass the URL
    /// without credentials.
    pub async fn get_json(&self, url: &str, display_url: &str) -> Result<Value, ClientError> {
        let max_retries = self.settings.max_retries;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.settings.retry_backoff).await;
            }
            self.throttle().await;

            debug!(url = display_url, attempt, "Sending request");
            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                    return resp.json::<Value>().await.map_err(|err| {
                        ClientError::UnexpectedResponse {
                            url: display_url.to_string(),
                            reason: err.without_url().to_string(),
                        }
                    });
                }
                Ok(resp) => warn!(
                    url = display_url,
                    status = resp.status().as_u16(),
                    "Request {}/{} failed",
                    attempt + 1,
                    max_retries + 1
                ),
                Err(err) => warn!(
                    url = display_url,
                    error = %err.without_url(),
                    "Request {}/{} failed",
                    attempt + 1,
                    max_retries + 1
                ),
            }
        }

        Err(ClientError::MaxRetriesExceeded {
            url: display_url.to_string(),
            max_retries,
        })
    }
}
