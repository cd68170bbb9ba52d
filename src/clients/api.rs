//! REST API client contract and key handling

use crate::clients::{fred::FredClient, polygon::PolygonClient};
use crate::core::{
    config::AppConfig,
    error::{ClientError, ConfigError},
};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const POLYGON_KEY_VAR: &str = "POLYGON_KEY";
pub const FRED_KEY_VAR: &str = "FRED_KEY";

const POLYGON_KEY_WEBSITE: &str = "https://polygon.io/dashboard/api-keys";
const FRED_KEY_WEBSITE: &str = "https://fred.stlouisfed.org/docs/api/api_key.html";

/// A keyed JSON API
///
/// `url` never carries the key; the client adds it.
#[async_trait]
pub trait ApiClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn request(&self, url: &str) -> Result<Value, ClientError>;
}

/// API keys found in the environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    pub polygon: Option<String>,
    pub fred: Option<String>,
}

impl ApiKeys {
    /// Read `POLYGON_KEY` and `FRED_KEY`; empty values count as absent
    pub fn from_env() -> Self {
        let read = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            polygon: read(POLYGON_KEY_VAR),
            fred: read(FRED_KEY_VAR),
        }
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***");
        f.debug_struct("ApiKeys")
            .field("polygon", &mask(&self.polygon))
            .field("fred", &mask(&self.fred))
            .finish()
    }
}

/// API clients available to a pipeline run
///
/// A missing key only becomes an error when a step asks for that client.
#[derive(Clone, Default)]
pub struct ApiClients {
    polygon: Option<Arc<dyn ApiClient>>,
    fred: Option<Arc<dyn ApiClient>>,
}

impl ApiClients {
    pub fn new(polygon: Option<Arc<dyn ApiClient>>, fred: Option<Arc<dyn ApiClient>>) -> Self {
        Self { polygon, fred }
    }

    /// Build a client for every key present
    pub fn from_keys(keys: &ApiKeys, config: &AppConfig) -> Result<Self, ClientError> {
        let polygon = match &keys.polygon {
            Some(key) => Some(Arc::new(PolygonClient::new(key, &config.polygon)?) as Arc<dyn ApiClient>),
            None => None,
        };
        let fred = match &keys.fred {
            Some(key) => Some(Arc::new(FredClient::new(key, &config.fred)?) as Arc<dyn ApiClient>),
            None => None,
        };
        Ok(Self { polygon, fred })
    }

    pub fn polygon(&self) -> Result<Arc<dyn ApiClient>, ConfigError> {
        self.polygon.clone().ok_or_else(|| ConfigError::MissingApiKey {
            api_name: "Polygon".to_string(),
            env_var: POLYGON_KEY_VAR.to_string(),
            website: POLYGON_KEY_WEBSITE.to_string(),
        })
    }

    pub fn fred(&self) -> Result<Arc<dyn ApiClient>, ConfigError> {
        self.fred.clone().ok_or_else(|| ConfigError::MissingApiKey {
            api_name: "FRED".to_string(),
            env_var: FRED_KEY_VAR.to_string(),
            website: FRED_KEY_WEBSITE.to_string(),
        })
    }
}

impl fmt::Debug for ApiClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClients")
            .field("polygon", &self.polygon.as_ref().map(|c| c.name()))
            .field("fred", &self.fred.as_ref().map(|c| c.name()))
            .finish()
    }
}
