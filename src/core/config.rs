//! Pipeline configuration from YAML

use crate::core::{
    error::{ConfigError, StepError},
    PipelineName, StepName,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config shipped with the binary
pub const DEFAULT_CONFIG: &str = include_str!("../../config/pipelines.yaml");

/// Config path looked up when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "config/pipelines.yaml";

/// What to do when a step reports `success == false`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the flag and keep going
    #[default]
    Continue,
    /// Stop the pipeline and report failure
    #[serde(rename = "abort")]
    #[value(name = "abort")]
    AbortOnFailure,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("continue"),
            FailurePolicy::AbortOnFailure => f.write_str("abort"),
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClientKind {
    Sqlite,
    Postgres,
}

impl ClientKind {
    pub const ALL: [ClientKind; 2] = [ClientKind::Sqlite, ClientKind::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Sqlite => "SQLITE",
            ClientKind::Postgres => "POSTGRES",
        }
    }
}

impl TryFrom<String> for ClientKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ConfigError::InvalidClient {
                client: value,
                allowed: Self::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            })
    }
}

impl From<ClientKind> for String {
    fn from(kind: ClientKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column type of a configured field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dtype {
    Varchar(u32),
    Float,
    Integer,
    /// `%Y-%m-%d`
    Date,
    /// `%Y-%m-%d %H:%M:%S`
    Datetime,
}

impl Dtype {
    /// DDL type for the given backend
    ///
    /// Postgres stores dates as fixed-width text so both backends compare
    /// them the same way.
    pub fn sql_type(&self, kind: ClientKind) -> String {
        match (self, kind) {
            (Dtype::Varchar(len), _) => format!("VARCHAR({len})"),
            (Dtype::Float, ClientKind::Sqlite) => "FLOAT".to_string(),
            (Dtype::Float, ClientKind::Postgres) => "DOUBLE PRECISION".to_string(),
            (Dtype::Integer, ClientKind::Sqlite) => "INTEGER".to_string(),
            (Dtype::Integer, ClientKind::Postgres) => "BIGINT".to_string(),
            (Dtype::Date, ClientKind::Sqlite) => "DATE".to_string(),
            (Dtype::Date, ClientKind::Postgres) => "VARCHAR(10)".to_string(),
            (Dtype::Datetime, ClientKind::Sqlite) => "DATETIME".to_string(),
            (Dtype::Datetime, ClientKind::Postgres) => "VARCHAR(19)".to_string(),
        }
    }
}

impl TryFrom<String> for Dtype {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        let dtype = match normalized.as_str() {
            "FLOAT" => Dtype::Float,
            "INTEGER" => Dtype::Integer,
            "DATE" => Dtype::Date,
            "DATETIME" => Dtype::Datetime,
            "VARCHAR" => Dtype::Varchar(255),
            other => {
                let len = other
                    .strip_prefix("VARCHAR(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|len| len.trim().parse::<u32>().ok());
                match len {
                    Some(len) => Dtype::Varchar(len),
                    None => {
                        return Err(ConfigError::InvalidConfig(format!(
                            "Unknown dtype '{value}'"
                        )))
                    }
                }
            }
        };
        Ok(dtype)
    }
}

impl From<Dtype> for String {
    fn from(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Varchar(len) => format!("VARCHAR({len})"),
            Dtype::Float => "FLOAT".to_string(),
            Dtype::Integer => "INTEGER".to_string(),
            Dtype::Date => "DATE".to_string(),
            Dtype::Datetime => "DATETIME".to_string(),
        }
    }
}

/// Mapping from a source record field to a table column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the API record / staged file header
    pub source: String,
    /// Column name in the table
    pub column: String,
    pub dtype: Dtype,
}

/// One table a pipeline writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub schema: String,

    /// Section of the API payload this table is filled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_path: Option<String>,

    pub fields: Vec<FieldMapping>,

    /// Fields appended after `fields`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_fields: Vec<FieldMapping>,

    /// Source fields that must hold a value of the right type
    #[serde(default)]
    pub required: Vec<String>,
}

impl TableConfig {
    /// All fields, in column order
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().chain(self.extra_fields.iter())
    }

    /// Source field names, in column order
    pub fn headers(&self) -> Vec<String> {
        self.all_fields().map(|f| f.source.clone()).collect()
    }

    pub fn field(&self, source: &str) -> Option<&FieldMapping> {
        self.all_fields().find(|f| f.source == source)
    }

    /// `schema.NAME`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Staging file stem, e.g. `stock_daily_prices`
    pub fn file_stem(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

/// Storage client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub kind: ClientKind,

    /// SQLite main database file; schemas are attached next to it.
    /// `:memory:` keeps everything in memory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Rows per insert batch
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Polygon API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonConfig {
    pub base_url: String,
    pub endpoints: BTreeMap<String, String>,

    /// How far back a first run reaches
    #[serde(default = "default_max_days_hist")]
    pub max_days_hist: i64,

    /// 0 disables throttling
    #[serde(default)]
    pub calls_per_min: u32,

    #[serde(default = "default_max_pagination")]
    pub max_pagination: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Exclusive end of daily extraction; today when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_until: Option<NaiveDate>,
}

/// FRED API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FredConfig {
    pub base_url: String,
    pub endpoints: BTreeMap<String, String>,

    /// Series ids fetched by the index pipeline
    #[serde(default)]
    pub indexes: Vec<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PolygonConfig {
    /// `base_url` joined with a configured endpoint
    pub fn endpoint_url(&self, endpoint: &str) -> Option<String> {
        self.endpoints
            .get(endpoint)
            .map(|path| format!("{}{}", self.base_url, path))
    }
}

impl FredConfig {
    /// `base_url` joined with a configured endpoint
    pub fn endpoint_url(&self, endpoint: &str) -> Option<String> {
        self.endpoints
            .get(endpoint)
            .map(|path| format!("{}{}", self.base_url, path))
    }
}

/// Financial statement pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialsConfig {
    /// `schema.TABLE` listing the tickers to track
    pub ticker_source_table: String,
    pub ticker_source_column: String,

    /// Tickers fetched per run
    #[serde(default = "default_max_tickers")]
    pub max_tickers: usize,
}

/// Whole configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Staging directory for extracted and validated files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    pub client: ClientConfig,
    pub polygon: PolygonConfig,
    pub fred: FredConfig,
    pub financials: FinancialsConfig,

    /// Schemas created/attached by the storage client
    pub schemas: Vec<String>,

    /// Pipelines in execution order
    pub run_order: Vec<String>,

    /// Tables per pipeline
    pub pipelines: BTreeMap<String, Vec<TableConfig>>,
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("database/stock_database.db")
}

fn default_chunk_size() -> usize {
    50_000
}

fn default_max_days_hist() -> i64 {
    730
}

fn default_max_pagination() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tickers() -> usize {
    50
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration compiled into the binary
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_yaml(DEFAULT_CONFIG)
    }

    /// Explicit path, else `config/pipelines.yaml` if present, else the
    /// embedded default
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Self::embedded(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let schemas: HashSet<String> = self.schemas.iter().map(|s| s.to_lowercase()).collect();

        for name in self.pipelines.keys() {
            name.parse::<PipelineName>()?;
        }

        for name in &self.run_order {
            let pipeline: PipelineName = name.parse()?;
            if self.tables(pipeline.as_str()).is_empty() {
                return Err(ConfigError::MissingTables {
                    pipeline: name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (pipeline, tables) in &self.pipelines {
            for table in tables {
                if !schemas.contains(&table.schema.to_lowercase()) {
                    return Err(ConfigError::UnknownSchema {
                        schema: table.schema.clone(),
                        allowed: self.schemas.clone(),
                    });
                }

                if !seen.insert(table.qualified_name().to_uppercase()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "Table '{}' is configured more than once",
                        table.qualified_name()
                    )));
                }

                for required in &table.required {
                    if table.field(required).is_none() {
                        return Err(ConfigError::InvalidConfig(format!(
                            "Required field '{}' of table '{}' is not a configured field",
                            required, table.name
                        )));
                    }
                }

                if pipeline == PipelineName::Financials.as_str() && table.endpoint_path.is_none() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "Table '{}' of '{}' needs an endpoint_path",
                        table.name, pipeline
                    )));
                }
            }
        }

        if self.client.chunk_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "client.chunk_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Tables of a pipeline; empty for unknown names
    pub fn tables(&self, pipeline: &str) -> &[TableConfig] {
        self.pipelines
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every configured table with the pipeline that owns it
    pub fn all_tables(&self) -> impl Iterator<Item = (&str, &TableConfig)> {
        self.pipelines
            .iter()
            .flat_map(|(pipeline, tables)| tables.iter().map(move |t| (pipeline.as_str(), t)))
    }

    /// Table names as configured
    pub fn table_names(&self) -> Vec<String> {
        self.all_tables().map(|(_, t)| t.name.clone()).collect()
    }
}

/// Per-run settings handed to the factories and to every step
#[derive(Debug, Clone)]
pub struct Settings {
    /// Requested pipeline name
    pub pipeline: String,
    config: Arc<AppConfig>,
}

impl Settings {
    pub fn new(pipeline: impl Into<String>, config: Arc<AppConfig>) -> Self {
        Self {
            pipeline: pipeline.into(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    /// Tables of the requested pipeline
    pub fn pipeline_tables(&self) -> &[TableConfig] {
        self.config.tables(&self.pipeline)
    }

    /// First table of the pipeline, for single-table steps
    pub fn table(&self, step: StepName) -> Result<&TableConfig, StepError> {
        self.pipeline_tables()
            .first()
            .ok_or_else(|| StepError::MissingTableConfig {
                step,
                pipeline: self.pipeline.clone(),
            })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.config.temp_dir
    }

    pub fn client_kind(&self) -> ClientKind {
        self.config.client.kind
    }
}
