//! Storage client contract and value model

use crate::core::{
    config::{AppConfig, ClientKind},
    error::{ClientError, PipelineError},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single SQL value, as bound or as read back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// One result row, columns in select order
pub type SqlRow = Vec<SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => write!(f, "{r}"),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Database access shared by every step of a pipeline run
#[async_trait]
pub trait StorageClient: Send + Sync {
    fn kind(&self) -> ClientKind;

    /// Run one statement and return its rows (empty for DDL/DML)
    async fn execute(&self, sql: &str) -> Result<Vec<SqlRow>, ClientError>;

    /// Run one parameterised statement per row, in a single transaction.
    /// Returns the number of affected rows.
    async fn execute_many(&self, sql: &str, rows: &[SqlRow]) -> Result<u64, ClientError>;
}

/// Open the storage client configured in `client.kind`
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn StorageClient>, PipelineError> {
    match config.client.kind {
        ClientKind::Sqlite => {
            let client =
                super::sqlite::SqliteClient::connect(&config.client.db_path, &config.schemas)
                    .await?;
            Ok(Arc::new(client))
        }
        #[cfg(feature = "postgres")]
        ClientKind::Postgres => {
            let options = super::postgres::PostgresClient::options_from_env()?;
            let client = super::postgres::PostgresClient::connect(options, &config.schemas).await?;
            Ok(Arc::new(client))
        }
        #[cfg(not(feature = "postgres"))]
        ClientKind::Postgres => Err(crate::core::error::ConfigError::InvalidClient {
            client: ClientKind::Postgres.to_string(),
            allowed: vec![ClientKind::Sqlite.to_string()],
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(SqlValue::from("2024-01-02").as_str(), Some("2024-01-02"));
        assert_eq!(SqlValue::from(3i64).as_f64(), Some(3.0));
        assert_eq!(SqlValue::from(2.5).as_i64(), Some(2));
        assert!(SqlValue::from(None::<String>).is_null());
        assert_eq!(SqlValue::Null.to_string(), "");
    }

    #[test]
    fn test_value_serializes_untagged() {
        let row: SqlRow = vec![SqlValue::from("SPY"), SqlValue::Real(1.5), SqlValue::Null];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"["SPY",1.5,null]"#);
    }
}
