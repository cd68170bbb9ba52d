//! CLI command definitions

use crate::core::{config::FailurePolicy, scope::Scope};
use clap::Args;

/// Run the pipelines in scope
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Which pipelines to run
    #[arg(long, value_enum, default_value_t = Scope::All)]
    pub scope: Scope,

    /// Table or schema name for `--scope table` / `--scope schema`
    #[arg(long)]
    pub sub_scope: Option<String>,

    /// Comma-separated tables to leave out
    #[arg(long)]
    pub skip: Option<String>,

    /// Override the configured failure policy
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate the configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List configured pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}
