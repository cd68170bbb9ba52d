//! Table-level SQL helpers over a [`StorageClient`]

use crate::clients::storage::{SqlRow, SqlValue, StorageClient};
use crate::core::{
    config::{ClientKind, Dtype, TableConfig},
    error::ClientError,
};
use std::sync::Arc;
use tracing::debug;

/// SQL access to one configured table
///
/// Opening the handler creates the table if it does not exist.
pub struct SqlHandler {
    client: Arc<dyn StorageClient>,
    table: TableConfig,
}

impl SqlHandler {
    pub async fn open(client: Arc<dyn StorageClient>, table: TableConfig) -> Result<Self, ClientError> {
        let handler = Self { client, table };
        debug!(table = %handler.qualified_name(), "Creating table if not exists");
        handler.client.execute(&handler.create_table_sql()).await?;
        Ok(handler)
    }

    pub fn table(&self) -> &TableConfig {
        &self.table
    }

    pub fn qualified_name(&self) -> String {
        self.table.qualified_name()
    }

    /// Column a source field is stored in
    pub fn column_for(&self, source: &str) -> Option<&str> {
        self.table.field(source).map(|f| f.column.as_str())
    }

    pub fn create_table_sql(&self) -> String {
        let kind = self.client.kind();
        let columns: Vec<String> = self
            .table
            .all_fields()
            .map(|f| format!("{} {}", f.column, f.dtype.sql_type(kind)))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_name(),
            columns.join(", ")
        )
    }

    pub fn insert_sql(&self) -> String {
        let kind = self.client.kind();
        let placeholders: Vec<String> = self
            .table
            .all_fields()
            .enumerate()
            .map(|(i, f)| placeholder(kind, i + 1, f.dtype))
            .collect();
        format!(
            "INSERT INTO {} VALUES ({})",
            self.qualified_name(),
            placeholders.join(", ")
        )
    }

    /// Insert staged rows
    ///
    /// `header` names the source field of each cell; cells are reordered to the
    /// configured column order and typed by their dtype. Fields absent from
    /// the header are stored as NULL. Returns the number of inserted rows.
    pub async fn insert_into<R: AsRef<[String]>>(
        &self,
        header: &[String],
        rows: &[R],
    ) -> Result<u64, ClientError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let positions: Vec<(Option<usize>, Dtype)> = self
            .table
            .all_fields()
            .map(|f| (header.iter().position(|h| *h == f.source), f.dtype))
            .collect();

        let values: Vec<SqlRow> = rows
            .iter()
            .map(|row| {
                let row = row.as_ref();
                positions
                    .iter()
                    .map(|(pos, dtype)| match pos.and_then(|p| row.get(p)) {
                        Some(raw) => typed_value(*dtype, raw),
                        None => SqlValue::Null,
                    })
                    .collect()
            })
            .collect();

        self.client.execute_many(&self.insert_sql(), &values).await
    }

    /// Run a query
    pub async fn query(&self, sql: &str) -> Result<Vec<SqlRow>, ClientError> {
        self.client.execute(sql).await
    }

    /// Run a query that may fail on a table that does not exist yet
    pub async fn try_query(&self, sql: &str) -> Option<Vec<SqlRow>> {
        try_query(self.client.as_ref(), sql).await
    }
}

/// Soft query: failures are logged at debug level and yield `None`
pub async fn try_query(client: &dyn StorageClient, sql: &str) -> Option<Vec<SqlRow>> {
    match client.execute(sql).await {
        Ok(rows) => {
            if rows.is_empty() {
                debug!(sql, "Query returned no rows");
            }
            Some(rows)
        }
        Err(err) => {
            debug!(sql, error = %err, "Query failed");
            None
        }
    }
}

/// Bind placeholder for parameter `index` (1-based)
///
/// Postgres parameters carry an explicit cast so untyped NULLs land in
/// typed columns.
fn placeholder(kind: ClientKind, index: usize, dtype: Dtype) -> String {
    match kind {
        ClientKind::Sqlite => "?".to_string(),
        ClientKind::Postgres => format!("${index}::{}", dtype.sql_type(kind)),
    }
}

/// Convert a staged cell to a SQL value of the column's type
///
/// Empty or unparsable numeric cells become NULL.
pub fn typed_value(dtype: Dtype, raw: &str) -> SqlValue {
    let raw = raw.trim();
    if raw.is_empty() {
        return SqlValue::Null;
    }
    match dtype {
        Dtype::Float => raw.parse::<f64>().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        Dtype::Integer => raw
            .parse::<i64>()
            .map(SqlValue::Integer)
            .or_else(|_| raw.parse::<f64>().map(|f| SqlValue::Integer(f as i64)))
            .unwrap_or(SqlValue::Null),
        Dtype::Varchar(_) | Dtype::Date | Dtype::Datetime => SqlValue::Text(raw.to_string()),
    }
}

/// First column of the first row
pub fn scalar(rows: &[SqlRow]) -> Option<&SqlValue> {
    rows.first()
        .and_then(|row| row.first())
        .filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::sqlite::SqliteClient;
    use crate::core::config::AppConfig;

    async fn handler(pipeline: &str) -> SqlHandler {
        let config = AppConfig::embedded().unwrap();
        let client = SqliteClient::in_memory(&config.schemas).await.unwrap();
        let table = config.tables(pipeline)[0].clone();
        SqlHandler::open(Arc::new(client), table).await.unwrap()
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_table_sql() {
        let handler = handler("index-daily-close-pipeline").await;
        assert_eq!(
            handler.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS bronze_layer.INDEX_DAILY_CLOSE \
             (date DATE, index_code VARCHAR(255), close_value FLOAT, updated_at DATETIME)"
        );
        assert_eq!(
            handler.insert_sql(),
            "INSERT INTO bronze_layer.INDEX_DAILY_CLOSE VALUES (?, ?, ?, ?)"
        );
        assert_eq!(handler.column_for("index"), Some("index_code"));
    }

    #[tokio::test]
    async fn test_insert_maps_header_to_columns() {
        let handler = handler("index-daily-close-pipeline").await;
        // header order differs from column order
        let header = strings(&["index", "value", "date", "updated_at"]);
        let rows = vec![
            strings(&["SP500", "4700.5", "2024-01-02", "2024-01-03 10:00:00"]),
            strings(&["DJIA", "", "2024-01-02", "2024-01-03 10:00:00"]),
        ];

        let inserted = handler.insert_into(&header, &rows).await.unwrap();
        assert_eq!(inserted, 2);

        let stored = handler
            .query("SELECT date, index_code, close_value FROM bronze_layer.INDEX_DAILY_CLOSE ORDER BY index_code")
            .await
            .unwrap();
        assert_eq!(
            stored,
            vec![
                vec![SqlValue::from("2024-01-02"), SqlValue::from("DJIA"), SqlValue::Null],
                vec![SqlValue::from("2024-01-02"), SqlValue::from("SP500"), SqlValue::Real(4700.5)],
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_insert_is_noop() {
        let handler = handler("index-daily-close-pipeline").await;
        let rows: Vec<Vec<String>> = Vec::new();
        assert_eq!(handler.insert_into(&strings(&["date"]), &rows).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_try_query_is_soft() {
        let handler = handler("index-daily-close-pipeline").await;
        assert!(handler.try_query("SELECT * FROM bronze_layer.NOPE").await.is_none());

        let rows = handler
            .try_query("SELECT MAX(date) FROM bronze_layer.INDEX_DAILY_CLOSE")
            .await
            .unwrap();
        assert_eq!(scalar(&rows), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholder(ClientKind::Sqlite, 3, Dtype::Float), "?");
        assert_eq!(
            placeholder(ClientKind::Postgres, 3, Dtype::Float),
            "$3::DOUBLE PRECISION"
        );
    }

    #[test]
    fn test_typed_value() {
        assert_eq!(typed_value(Dtype::Float, "1.5e3"), SqlValue::Real(1500.0));
        assert_eq!(typed_value(Dtype::Float, "."), SqlValue::Null);
        assert_eq!(typed_value(Dtype::Integer, "12.0"), SqlValue::Integer(12));
        assert_eq!(typed_value(Dtype::Date, "2024-01-02"), SqlValue::from("2024-01-02"));
        assert_eq!(typed_value(Dtype::Varchar(255), "  "), SqlValue::Null);
    }
}
