//! `validate` and `validate-many`: split a staged file into valid and
//! invalid rows by the table's required fields

use crate::core::{
    config::{Dtype, Settings, TableConfig},
    context::{StepOutput, ValidatedFiles},
    error::StepError,
    step::{Step, StepName, StepOptions, StepOutcome},
};
use crate::util::csv_handler::{clean_temp_file, ensure_parent_dir};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info, warn};

/// Validates the file staged by a single-table extractor
pub struct Validator {
    previous_output: StepOutput,
    settings: Settings,
    options: StepOptions,
}

impl Validator {
    pub fn new(previous_output: StepOutput, settings: Settings, options: StepOptions) -> Self {
        Self {
            previous_output,
            settings,
            options,
        }
    }
}

#[async_trait]
impl Step for Validator {
    fn name(&self) -> StepName {
        StepName::Validate
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let file_path = self.previous_output.require_file_path(self.name())?;
        let table = self.settings.table(self.name())?;

        let files = validate_file(file_path, table, self.options.clean_temp_files)?;

        Ok(StepOutcome::success(StepOutput {
            validated: Some(files),
            ..StepOutput::default()
        }))
    }
}

/// Validates one staged file per pipeline table
pub struct ManyValidator {
    previous_output: StepOutput,
    settings: Settings,
    options: StepOptions,
}

impl ManyValidator {
    pub fn new(previous_output: StepOutput, settings: Settings, options: StepOptions) -> Self {
        Self {
            previous_output,
            settings,
            options,
        }
    }
}

#[async_trait]
impl Step for ManyValidator {
    fn name(&self) -> StepName {
        StepName::ValidateMany
    }

    async fn run(&mut self) -> Result<StepOutcome, StepError> {
        let files_path = self.previous_output.require_files_path(self.name())?;

        let mut validated = BTreeMap::new();
        for table in self.settings.pipeline_tables() {
            let file_path = files_path
                .get(&table.name)
                .ok_or_else(|| StepError::MissingInput {
                    step: StepName::ValidateMany,
                    key: format!("files_path.{}", table.name),
                })?;
            let files = validate_file(file_path, table, self.options.clean_temp_files)?;
            validated.insert(table.name.clone(), files);
        }

        Ok(StepOutcome::success(StepOutput {
            validated_many: Some(validated),
            ..StepOutput::default()
        }))
    }
}

/// `<stem>_valid.csv` / `<stem>_invalid.csv` next to `file_path`
pub fn validated_paths(file_path: &Path) -> ValidatedFiles {
    let stem = file_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ValidatedFiles {
        valid: file_path.with_file_name(format!("{stem}_valid.csv")),
        invalid: file_path.with_file_name(format!("{stem}_invalid.csv")),
    }
}

/// Whether `raw` is a present value of type `dtype`
pub fn is_valid_value(dtype: Dtype, raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    match dtype {
        Dtype::Varchar(len) => raw.chars().count() <= len as usize,
        Dtype::Float => raw.parse::<f64>().map(f64::is_finite).unwrap_or(false),
        Dtype::Integer => raw.parse::<i64>().is_ok(),
        Dtype::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok(),
        Dtype::Datetime => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok(),
    }
}

/// Split `file_path` into valid and invalid rows
///
/// The valid file is rewritten on every call; the invalid file accumulates
/// across runs and gets its header only when created. A missing staged file
/// is not an error: nothing was extracted.
pub fn validate_file(
    file_path: &Path,
    table: &TableConfig,
    clean_temp_files: bool,
) -> Result<ValidatedFiles, StepError> {
    let files = validated_paths(file_path);

    if !file_path.is_file() {
        info!(file = %file_path.display(), "No file to validate");
        return Ok(files);
    }

    let mut reader = csv::Reader::from_path(file_path)?;
    let header = reader.headers()?.clone();

    let checks: Vec<(&str, Option<usize>, Dtype)> = table
        .required
        .iter()
        .filter_map(|source| table.field(source))
        .map(|field| {
            let position = header.iter().position(|h| h == field.source);
            if position.is_none() {
                warn!(field = %field.source, "Required field missing from staged file");
            }
            (field.source.as_str(), position, field.dtype)
        })
        .collect();

    ensure_parent_dir(&files.valid)?;
    let mut valid = csv::Writer::from_path(&files.valid)?;
    valid.write_record(&header)?;

    let invalid_exists = files.invalid.is_file();
    let invalid_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&files.invalid)?;
    let mut invalid = csv::Writer::from_writer(invalid_file);
    if !invalid_exists {
        invalid.write_record(&header)?;
    }

    let (mut rows, mut invalid_rows) = (0usize, 0usize);
    for record in reader.records() {
        let record = record?;
        let failed = checks.iter().find(|(_, position, dtype)| {
            let raw = position.and_then(|p| record.get(p)).unwrap_or("");
            !is_valid_value(*dtype, raw)
        });

        match failed {
            None => valid.write_record(&record)?,
            Some((field, position, _)) => {
                debug!(
                    field = *field,
                    value = position.and_then(|p| record.get(p)).unwrap_or(""),
                    "Invalid data found"
                );
                invalid.write_record(&record)?;
                invalid_rows += 1;
            }
        }
        rows += 1;
    }
    valid.flush()?;
    invalid.flush()?;

    if clean_temp_files {
        clean_temp_file(file_path)?;
    }

    info!(
        table = %table.name,
        rows,
        invalid = invalid_rows,
        "Validation complete"
    );
    Ok(files)
}
