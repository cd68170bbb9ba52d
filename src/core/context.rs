//! Step output envelope - the data handed from one step to the next

use crate::core::{error::StepError, step::StepName};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Valid/invalid file pair produced by validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedFiles {
    pub valid: PathBuf,
    pub invalid: PathBuf,
}

/// Last stored report date and the date from which new data is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerWindow {
    pub last_date: NaiveDate,
    pub next_date: NaiveDate,
}

/// Output of a step and input of the next one
///
/// Every run starts from `StepOutput::default()`. Each step replaces the whole
/// envelope; nothing is merged across steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Stop the pipeline after the step that set this
    #[serde(default)]
    pub skip_pipeline: bool,

    /// Staged file written by a single-table extractor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Valid/invalid files written by `validate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<ValidatedFiles>,

    /// Staged file per table (multi-table extractors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_path: Option<BTreeMap<String, PathBuf>>,

    /// Valid/invalid files per table, written by `validate-many`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_many: Option<BTreeMap<String, ValidatedFiles>>,

    /// Last stored date per index code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes_last_update: Option<BTreeMap<String, NaiveDate>>,

    /// Tickers whose reports are out of date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tickers: Option<BTreeMap<String, TickerWindow>>,

    /// Ad-hoc values without a dedicated field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output that stops the pipeline
    pub fn skip() -> Self {
        Self {
            skip_pipeline: true,
            ..Self::default()
        }
    }

    pub fn with_file_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Set an ad-hoc value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get an ad-hoc value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn require_file_path(&self, step: StepName) -> Result<&Path, StepError> {
        self.file_path
            .as_deref()
            .ok_or_else(|| missing(step, "file_path"))
    }

    pub fn require_validated(&self, step: StepName) -> Result<&ValidatedFiles, StepError> {
        self.validated
            .as_ref()
            .ok_or_else(|| missing(step, "valid_file_path"))
    }

    pub fn require_files_path(
        &self,
        step: StepName,
    ) -> Result<&BTreeMap<String, PathBuf>, StepError> {
        self.files_path
            .as_ref()
            .ok_or_else(|| missing(step, "files_path"))
    }

    pub fn require_validated_many(
        &self,
        step: StepName,
    ) -> Result<&BTreeMap<String, ValidatedFiles>, StepError> {
        self.validated_many
            .as_ref()
            .ok_or_else(|| missing(step, "validated_many"))
    }

    pub fn require_indexes_last_update(
        &self,
        step: StepName,
    ) -> Result<&BTreeMap<String, NaiveDate>, StepError> {
        self.indexes_last_update
            .as_ref()
            .ok_or_else(|| missing(step, "indexes_last_update"))
    }

    pub fn require_required_tickers(
        &self,
        step: StepName,
    ) -> Result<&BTreeMap<String, TickerWindow>, StepError> {
        self.required_tickers
            .as_ref()
            .ok_or_else(|| missing(step, "required_tickers"))
    }

    pub fn require_value(&self, step: StepName, key: &str) -> Result<&Value, StepError> {
        self.values.get(key).ok_or_else(|| missing(step, key))
    }
}

fn missing(step: StepName, key: &str) -> StepError {
    StepError::MissingInput {
        step,
        key: key.to_string(),
    }
}
