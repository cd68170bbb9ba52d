//! Postgres storage client

use crate::clients::storage::{SqlRow, SqlValue, StorageClient};
use crate::core::{
    config::ClientKind,
    error::{ClientError, ConfigError},
};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

/// Postgres client over a single pooled connection
#[derive(Debug, Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Connection options from `POSTGRES_USER`, `POSTGRES_PASSWORD`,
    /// `POSTGRES_HOST`, `POSTGRES_DB` and optional `POSTGRES_PORT`
    pub fn options_from_env() -> Result<PgConnectOptions, ConfigError> {
        let mut options = PgConnectOptions::new()
            .host(&required_env("POSTGRES_HOST")?)
            .username(&required_env("POSTGRES_USER")?)
            .password(&required_env("POSTGRES_PASSWORD")?)
            .database(&required_env("POSTGRES_DB")?);

        if let Ok(port) = std::env::var("POSTGRES_PORT") {
            let port = port.parse::<u16>().map_err(|_| {
                ConfigError::InvalidConfig(format!("POSTGRES_PORT '{port}' is not a valid port"))
            })?;
            options = options.port(port);
        }

        Ok(options)
    }

    /// Connect and create every schema that does not exist yet
    pub async fn connect(
        options: PgConnectOptions,
        schemas: &[String],
    ) -> Result<Self, ClientError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        for schema in schemas {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .execute(&pool)
                .await?;
        }

        info!(schemas = schemas.len(), "Connected to Postgres");
        Ok(Self { pool })
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::InvalidConfig(format!("Environment variable {name} is not set")))
}

/// One insert of `row`, as an unnamed statement
fn insert_query<'q>(sql: &'q str, row: &'q SqlRow) -> Query<'q, Postgres, PgArguments> {
    row.iter().fold(sqlx::query(sql).persistent(false), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.as_str()),
    }
}

fn decode_row(row: &PgRow) -> Result<SqlRow, ClientError> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                return Ok(SqlValue::Null);
            }
            let type_name = raw.type_info().name().to_string();
            let value = match type_name.as_str() {
                "INT2" => SqlValue::Integer(row.try_get::<i16, _>(i)?.into()),
                "INT4" => SqlValue::Integer(row.try_get::<i32, _>(i)?.into()),
                "INT8" => SqlValue::Integer(row.try_get(i)?),
                "FLOAT4" => SqlValue::Real(row.try_get::<f32, _>(i)?.into()),
                "FLOAT8" => SqlValue::Real(row.try_get(i)?),
                "BOOL" => SqlValue::Integer(row.try_get::<bool, _>(i)?.into()),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => SqlValue::Text(row.try_get(i)?),
                other => {
                    return Err(ClientError::Decode {
                        column: i,
                        reason: format!("unsupported Postgres type {other}"),
                    })
                }
            };
            Ok(value)
        })
        .collect()
}

#[async_trait]
impl StorageClient for PostgresClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Postgres
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
        // NULLs are bound as text; unnamed statements let each row declare its own types
        for row in rows {
            affected += insert_query(sql, row)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Arguments, Execute};
    use std::sync::Mutex;

    // Tests below touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [(&str, &str); 4] = [
        ("POSTGRES_HOST", "db.internal"),
        ("POSTGRES_USER", "loader"),
        ("POSTGRES_PASSWORD", "secret"),
        ("POSTGRES_DB", "markets"),
    ];

    #[test]
    fn test_options_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        for (name, value) in VARS {
            std::env::set_var(name, value);
        }
        std::env::remove_var("POSTGRES_PORT");
        std::env::remove_var("PGPORT");

        let options = PostgresClient::options_from_env().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_database(), Some("markets"));
        assert_eq!(options.get_port(), 5432);

        std::env::set_var("POSTGRES_PORT", "6543");
        assert_eq!(PostgresClient::options_from_env().unwrap().get_port(), 6543);

        std::env::set_var("POSTGRES_PORT", "not-a-port");
        let err = PostgresClient::options_from_env().unwrap_err();
        assert_eq!(err.key(), "INVALID_CONFIG");
        assert!(err.to_string().contains("not-a-port"));
        std::env::remove_var("POSTGRES_PORT");

        std::env::set_var("POSTGRES_PASSWORD", "");
        let err = PostgresClient::options_from_env().unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PASSWORD"));

        std::env::remove_var("POSTGRES_DB");
        std::env::set_var("POSTGRES_PASSWORD", "secret");
        let err = PostgresClient::options_from_env().unwrap_err();
        assert!(err.to_string().contains("POSTGRES_DB is not set"));
    }

    #[test]
    fn test_insert_query_binds_every_value() {
        let row: SqlRow = vec![
            SqlValue::from("AAPL"),
            SqlValue::from(181.91),
            SqlValue::from(42i64),
            SqlValue::Null,
        ];
        let sql = "INSERT INTO bronze_layer.stock_daily_prices VALUES ($1, $2, $3, $4)";

        let mut query = insert_query(sql, &row);
        assert_eq!(Execute::sql(&query), sql);
        assert!(!Execute::persistent(&query));
        let arguments = Execute::take_arguments(&mut query).unwrap().unwrap();
        assert_eq!(Arguments::len(&arguments), 4);
    }

    /// Round trip through a real server configured by the POSTGRES_* variables
    #[tokio::test]
    #[ignore = "needs a Postgres server"]
    async fn test_decode_round_trip() {
        let options = {
            let _guard = ENV_LOCK.lock().unwrap();
            PostgresClient::options_from_env().unwrap()
        };
        let client = PostgresClient::connect(options, &["bronze_layer".to_string()])
            .await
            .unwrap();

        client
            .execute("DROP TABLE IF EXISTS bronze_layer.decode_check")
            .await
            .unwrap();
        client
            .execute(
                "CREATE TABLE bronze_layer.decode_check \
                 (symbol VARCHAR(10), close FLOAT8, volume INT8, note TEXT)",
            )
            .await
            .unwrap();
        let inserted = client
            .execute_many(
                "INSERT INTO bronze_layer.decode_check VALUES ($1, $2, $3, $4)",
                &[vec![
                    SqlValue::from("AAPL"),
                    SqlValue::from(181.91),
                    SqlValue::from(42i64),
                    SqlValue::Null,
                ]],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = client
            .execute("SELECT symbol, close, volume, note, TRUE FROM bronze_layer.decode_check")
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::from("AAPL"),
                SqlValue::from(181.91),
                SqlValue::from(42i64),
                SqlValue::Null,
                SqlValue::Integer(1),
            ]]
        );

        let err = client.execute("SELECT NOW()").await.unwrap_err();
        assert!(matches!(err, ClientError::Decode { column: 0, .. }));
    }
}
