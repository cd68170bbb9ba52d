//! SQLite-based run history

use crate::core::PipelineName;
use crate::persistence::{state_from_columns, HistoryBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT run_id, pipeline, status, stopped_at, started_at, finished_at,
           completed_steps, failed_steps, total_steps
    FROM runs
"#;

/// SQLite history store
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open history database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Store in `<data dir>/market-pipeline/history.db`
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("market-pipeline");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(&db_dir.join("history.db")).await
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory history")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                status TEXT NOT NULL,
                stopped_at TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                completed_steps INTEGER NOT NULL DEFAULT 0,
                failed_steps INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialise history schema")?;

        Ok(())
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        let stopped_at: Option<String> = row.try_get("stopped_at")?;
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.try_get::<String, _>("run_id")?)?,
            pipeline: row.try_get::<String, _>("pipeline")?.parse()?,
            status: state_from_columns(&row.try_get::<String, _>("status")?, stopped_at.as_deref())?,
            started_at: Self::from_naive(row.try_get("started_at")?),
            finished_at: Self::from_naive(row.try_get("finished_at")?),
            completed_steps: row.try_get::<i64, _>("completed_steps")? as usize,
            failed_steps: row.try_get::<i64, _>("failed_steps")? as usize,
            total_steps: row.try_get::<i64, _>("total_steps")? as usize,
        })
    }
}

#[async_trait::async_trait]
impl HistoryBackend for SqliteHistoryStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (run_id, pipeline, status, stopped_at, started_at, finished_at,
             completed_steps, failed_steps, total_steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(run.pipeline.as_str())
        .bind(run.status.label())
        .bind(run.status.step().map(|s| s.as_str()))
        .bind(run.started_at.naive_utc())
        .bind(run.finished_at.naive_utc())
        .bind(run.completed_steps as i64)
        .bind(run.failed_steps as i64)
        .bind(run.total_steps as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{SELECT_RUNS} WHERE run_id = ?1"))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_runs(
        &self,
        pipeline: Option<PipelineName>,
        limit: usize,
    ) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RUNS} WHERE (?1 IS NULL OR pipeline = ?1) ORDER BY started_at DESC LIMIT ?2"
        ))
        .bind(pipeline.map(|p| p.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineName>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline FROM runs")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        let mut pipelines = rows
            .iter()
            .map(|row| Ok(row.try_get::<String, _>("pipeline")?.parse()?))
            .collect::<Result<Vec<PipelineName>>>()?;
        pipelines.sort();
        Ok(pipelines)
    }
}
