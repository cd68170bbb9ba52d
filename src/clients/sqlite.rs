//! SQLite storage client
//!
//! The main database file lives at `client.db_path`; every configured schema
//! is a separate database file attached next to it (`<dir>/<schema>.db`), so
//! tables are addressed as `schema.TABLE` exactly as on Postgres.

use crate::clients::storage::{SqlRow, SqlValue, StorageClient};
use crate::core::{config::ClientKind, error::ClientError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const IN_MEMORY: &str = ":memory:";

/// SQLite client over a single pooled connection
///
/// Attached schemas belong to a connection, so the pool keeps exactly one
/// connection open for its whole lifetime.
#[derive(Debug, Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteClient {
    /// Open (creating if missing) the database at `db_path` and attach `schemas`
    ///
    /// `:memory:` keeps the main database and every schema in memory.
    pub async fn connect(db_path: &Path, schemas: &[String]) -> Result<Self, ClientError> {
        let in_memory = db_path.as_os_str() == IN_MEMORY;

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            let dir = db_path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                if !dir.exists() {
                    info!(path = %dir.display(), "Database directory not found, creating it");
                    std::fs::create_dir_all(dir).map_err(|source| {
                        ClientError::DirectoryCreation {
                            path: dir.display().to_string(),
                            source,
                        }
                    })?;
                }
            }
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        let attach: Vec<String> = schemas
            .iter()
            .map(|schema| attach_statement(db_path, schema, in_memory))
            .collect();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .after_connect(move |conn, _meta| {
                let statements = attach.clone();
                Box::pin(async move {
                    for statement in &statements {
                        sqlx::query(statement).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        info!(db_path = %db_path.display(), schemas = schemas.len(), "Connected to SQLite");

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    /// In-memory database with the given schemas attached
    pub async fn in_memory(schemas: &[String]) -> Result<Self, ClientError> {
        Self::connect(Path::new(IN_MEMORY), schemas).await
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn attach_statement(db_path: &Path, schema: &str, in_memory: bool) -> String {
    let target = if in_memory {
        IN_MEMORY.to_string()
    } else {
        db_path
            .with_file_name(format!("{schema}.db"))
            .display()
            .to_string()
    };
    format!(
        "ATTACH DATABASE '{}' AS {}",
        target.replace('\'', "''"),
        schema
    )
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.as_str()),
    }
}

/// Decode a row by the runtime type of each value
fn decode_row(row: &SqliteRow) -> Result<SqlRow, ClientError> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                return Ok(SqlValue::Null);
            }
            let type_name = raw.type_info().name().to_string();
            let value = match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get(i)?),
                "REAL" => SqlValue::Real(row.try_get(i)?),
                "TEXT" | "DATE" | "DATETIME" | "TIME" => SqlValue::Text(row.try_get(i)?),
                other => {
                    return Err(ClientError::Decode {
                        column: i,
                        reason: format!("unsupported SQLite type {other}"),
                    })
                }
            };
            Ok(value)
        })
        .collect()
}

#[async_trait]
impl StorageClient for SqliteClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Sqlite
    }

    async fn execute(&self, sql: &str) -> Result<Vec<SqlRow>, ClientError> {
        debug!(sql, "Executing query");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_many(&self, sql: &str, rows: &[SqlRow]) -> Result<u64, ClientError> {
        debug!(sql, rows = rows.len(), "Executing batch");
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for row in rows {
            let query = row.iter().fold(sqlx::query(sql), bind_value);
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}
