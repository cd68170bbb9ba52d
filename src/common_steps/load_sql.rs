//! `load-sql` and `load-sql-many`: insert validated rows in chunks

use crate::clients::storage::StorageClient;
use crate::core::{
    config::{Settings, TableConfig},
    context::StepOutput,
    error::StepError,
    step::{Step, StepName, StepOptions, StepOutcome},
};
use crate::util::{csv_handler::clean_temp_file, SqlHandler};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Output key holding the number of inserted rows
pub const ROWS_LOADED: &str = "rows_loaded";

/// Loads the valid file of a single-table pipeline
pub struct SqlLoader {
    previous_output: StepOutput,
    settings: Settings,
    storage: Arc<dyn StorageClient>,
    options: StepOptions,
}

impl SqlLoader {
    pub fn new(
        previous_output: StepOutput,
        settings: Settings,
        storage: Arc<dyn StorageClient>,
        options: StepOptions,
    ) -> Self {
        Self {
            previous_output,
            settings,
            storage,
            options,
        }
    }
}

#[async_trait]
impl Step for SqlLoader {
    fn name(&self) -> StepName {
        StepName::LoadSql
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let files = self.previous_output.require_validated(self.name())?;
        let table = self.settings.table(self.name())?;

        let rows = load_file(
            Arc::clone(&self.storage),
            table,
            &files.valid,
            self.settings.config().client.chunk_size,
            self.options.clean_temp_files,
        )
        .await?;

        let mut output = StepOutput::default();
        output.insert(ROWS_LOADED, rows);
        Ok(StepOutcome::success(output))
    }
}

/// Loads one valid file per pipeline table
pub struct SqlManyLoader {
    previous_output: StepOutput,
    settings: Settings,
    storage: Arc<dyn StorageClient>,
    options: StepOptions,
}

impl SqlManyLoader {
    pub fn new(
        previous_output: StepOutput,
        settings: Settings,
        storage: Arc<dyn StorageClient>,
        options: StepOptions,
    ) -> Self {
        Self {
            previous_output,
            settings,
            storage,
            options,
        }
    }
}

#[async_trait]
impl Step for SqlManyLoader {
    fn name(&self) -> StepName {
        StepName::LoadSqlMany
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let validated = self.previous_output.require_validated_many(self.name())?;
        let chunk_size = self.settings.config().client.chunk_size;

        let mut loaded = Map::new();
        for table in self.settings.pipeline_tables() {
            let files = validated
                .get(&table.name)
                .ok_or_else(|| StepError::MissingInput {
                    step: StepName::LoadSqlMany,
                    key: format!("validated_many.{}", table.name),
                })?;
            let rows = load_file(
                Arc::clone(&self.storage),
                table,
                &files.valid,
                chunk_size,
                self.options.clean_temp_files,
            )
            .await?;
            loaded.insert(table.name.clone(), json!(rows));
        }

        let mut output = StepOutput::default();
        output.insert(ROWS_LOADED, Value::Object(loaded));
        Ok(StepOutcome::success(output))
    }
}

/// Insert every row of `valid_file` into `table`, `chunk_size` rows per batch
///
/// A missing file means there was nothing to load.
pub async fn load_file(
    storage: Arc<dyn StorageClient>,
    table: &TableConfig,
    valid_file: &Path,
    chunk_size: usize,
    clean_temp_files: bool,
) -> Result<u64, StepError> {
    if !valid_file.is_file() {
        info!(file = %valid_file.display(), "No file to load");
        return Ok(0);
    }

    let handler = SqlHandler::open(storage, table.clone()).await?;

    let mut reader = csv::Reader::from_path(valid_file)?;
    let header: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let (mut total, mut chunk_no) = (0u64, 0usize);
    let mut chunk: Vec<Vec<String>> = Vec::with_capacity(chunk_size.min(10_000));
    let mut records = reader.records();
    loop {
        chunk.clear();
        for record in records.by_ref().take(chunk_size) {
            chunk.push(record?.iter().map(String::from).collect());
        }
        if chunk.is_empty() {
            break;
        }

        chunk_no += 1;
        total += handler.insert_into(&header, &chunk).await?;
        info!(table = %handler.qualified_name(), rows = total, chunk = chunk_no, "Values inserted");

        if chunk.len() < chunk_size {
            break;
        }
    }

    if clean_temp_files {
        clean_temp_file(valid_file)?;
    }

    Ok(total)
}
