//! Step contract

use crate::core::{context::StepOutput, error::StepError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every step the factory knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    ExtractStockDailyPrices,
    ExtractStockCompanyDetails,
    CheckIndexDailyClose,
    ExtractIndexDailyClose,
    CheckFinancialsTables,
    ExtractFinancialsData,
    Validate,
    ValidateMany,
    LoadSql,
    LoadSqlMany,
}

impl StepName {
    pub const ALL: [StepName; 10] = [
        StepName::ExtractStockDailyPrices,
        StepName::ExtractStockCompanyDetails,
        StepName::CheckIndexDailyClose,
        StepName::ExtractIndexDailyClose,
        StepName::CheckFinancialsTables,
        StepName::ExtractFinancialsData,
        StepName::Validate,
        StepName::ValidateMany,
        StepName::LoadSql,
        StepName::LoadSqlMany,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ExtractStockDailyPrices => "extract-stock-daily-prices",
            StepName::ExtractStockCompanyDetails => "extract-stock-company-details",
            StepName::CheckIndexDailyClose => "check-index-daily-close",
            StepName::ExtractIndexDailyClose => "extract-index-daily-close",
            StepName::CheckFinancialsTables => "check-financials-tables",
            StepName::ExtractFinancialsData => "extract-financials-data",
            StepName::Validate => "validate",
            StepName::ValidateMany => "validate-many",
            StepName::LoadSql => "load-sql",
            StepName::LoadSqlMany => "load-sql-many",
        }
    }

    /// Names accepted by [`StepName::from_str`]
    pub fn allowed() -> Vec<String> {
        Self::ALL.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = crate::core::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| crate::core::error::ConfigError::StepNotFound {
                step: s.to_string(),
                allowed: Self::allowed(),
            })
    }
}

/// What a step hands back to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Reported success; logged and recorded, only acted upon under
    /// `FailurePolicy::AbortOnFailure`
    pub success: bool,

    /// Replaces the pipeline's running output
    pub output: StepOutput,
}

impl StepOutcome {
    pub fn success(output: StepOutput) -> Self {
        Self {
            success: true,
            output,
        }
    }

    pub fn failure(output: StepOutput) -> Self {
        Self {
            success: false,
            output,
        }
    }
}

/// Pipeline-level context forwarded to every step a pipeline creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOptions {
    /// Remove staging files once a step has consumed them
    pub clean_temp_files: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            clean_temp_files: true,
        }
    }
}

/// A single unit of pipeline work
///
/// Steps are built fresh for every invocation and dropped after `run`.
/// Expected conditions (nothing to process, empty table) return `Ok` with a
/// partial output; `Err` aborts the pipeline.
#[async_trait]
pub trait Step: Send {
    /// Registry name of this step
    fn name(&self) -> StepName;

    /// Execute the step
    async fn run(&mut self) -> Result<StepOutcome, StepError>;
}
