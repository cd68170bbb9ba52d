//! Error taxonomy for the pipeline core
//!
//! * [`ConfigError`]: invalid names, scopes, clients or config files. Always
//!   fatal and reported before (or instead of) running anything.
//! * [`ClientError`]: failures of the HTTP and SQL collaborators.
//! * [`StepError`]: a step could not do its work; aborts the pipeline.
//! * [`PipelineError`]: what `Pipeline::run` and the factories hand back to
//!   the runner.

use crate::core::{PipelineName, RunReport, StepName};
use thiserror::Error;

/// Configuration errors. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid pipeline '{pipeline}'. Must be one of {allowed:?}.")]
    InvalidPipeline {
        pipeline: String,
        allowed: Vec<String>,
    },

    #[error("Step '{step}' not found. Must be one of {allowed:?}.")]
    StepNotFound { step: String, allowed: Vec<String> },

    #[error("Invalid client '{client}'. Must be one of {allowed:?}.")]
    InvalidClient {
        client: String,
        allowed: Vec<String>,
    },

    #[error("Scope '{scope}' requires a sub-scope")]
    MissingSubScope { scope: String },

    #[error("Unknown table '{table}'. Must be one of {allowed:?}.")]
    UnknownTable { table: String, allowed: Vec<String> },

    #[error("Unknown schema '{schema}'. Must be one of {allowed:?}.")]
    UnknownSchema {
        schema: String,
        allowed: Vec<String>,
    },

    #[error("Missing {api_name} API key. Retrieve your key from {website} and export it as {env_var}.")]
    MissingApiKey {
        api_name: String,
        env_var: String,
        website: String,
    },

    #[error("Pipeline '{pipeline}' has no tables configured")]
    MissingTables { pipeline: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Stable identifier for the error class
    pub fn key(&self) -> &'static str {
        match self {
            ConfigError::InvalidPipeline { .. } => "INVALID_PIPELINE",
            ConfigError::StepNotFound { .. } => "STEP_NOT_FOUND",
            ConfigError::InvalidClient { .. } => "INVALID_CLIENT",
            ConfigError::MissingSubScope { .. } => "MISSING_SUB_SCOPE",
            ConfigError::UnknownTable { .. } => "UNKNOWN_TABLE",
            ConfigError::UnknownSchema { .. } => "UNKNOWN_SCHEMA",
            ConfigError::MissingApiKey { .. } => "MISSING_API_KEY",
            ConfigError::MissingTables { .. } => "MISSING_TABLES",
            ConfigError::InvalidConfig(_) => "INVALID_CONFIG",
            ConfigError::Read { .. } => "CONFIG_READ_ERROR",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        }
    }
}

/// Errors raised by API and storage clients
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exceeded maximum number of retries ({max_retries}) for url={url}")]
    MaxRetriesExceeded { url: String, max_retries: u32 },

    #[error("Unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Failed to create directory at '{path}': {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode column {column}: {reason}")]
    Decode { column: usize, reason: String },
}

/// Errors raised by a step's `run`
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step '{step}' requires '{key}' in previous output")]
    MissingInput { step: StepName, key: String },

    #[error("Step '{step}' found no table config for pipeline '{pipeline}'")]
    MissingTableConfig { step: StepName, pipeline: String },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Factory(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] ClientError),

    #[error("Pipeline '{pipeline}' could not create step '{step}': {source}")]
    StepCreation {
        pipeline: PipelineName,
        step: StepName,
        #[source]
        source: ConfigError,
        report: Box<RunReport>,
    },

    #[error("Pipeline '{pipeline}' failed at step '{step}': {source}")]
    Step {
        pipeline: PipelineName,
        step: StepName,
        #[source]
        source: StepError,
        report: Box<RunReport>,
    },
}

impl PipelineError {
    /// Report of the run this error ended, if it started
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::StepCreation { report, .. } | Self::Step { report, .. } => {
                Some(report.as_ref())
            }
            Self::Factory(_) | Self::Storage(_) => None,
        }
    }
}
