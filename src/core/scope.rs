//! Scope resolution - which pipelines a run covers

use crate::core::{
    config::{AppConfig, TableConfig},
    error::ConfigError,
    PipelineName,
};
use std::collections::HashSet;
use std::fmt;

/// Selection requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scope {
    /// Pipelines loading one table
    Table,
    /// Pipelines loading any table of one schema
    Schema,
    /// Every pipeline in the configured run order
    All,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Table => f.write_str("table"),
            Scope::Schema => f.write_str("schema"),
            Scope::All => f.write_str("all"),
        }
    }
}

/// Resolve a scope to the ordered pipelines to run
///
/// Order follows `run_order`. A pipeline is dropped when every one of its
/// tables is in the comma-separated `skip` list. Table and schema names match
/// case-insensitively.
pub fn resolve(
    scope: Scope,
    sub_scope: Option<&str>,
    skip: Option<&str>,
    config: &AppConfig,
) -> Result<Vec<PipelineName>, ConfigError> {
    let skipped = parse_skip_list(skip, config)?;

    let selection = match scope {
        Scope::All => Selection::All,
        Scope::Table => {
            let table = required_sub_scope(scope, sub_scope)?;
            if !config
                .all_tables()
                .any(|(_, t)| t.name.eq_ignore_ascii_case(table))
            {
                return Err(ConfigError::UnknownTable {
                    table: table.to_string(),
                    allowed: config.table_names(),
                });
            }
            Selection::Table(table)
        }
        Scope::Schema => {
            let schema = required_sub_scope(scope, sub_scope)?;
            if !config.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema)) {
                return Err(ConfigError::UnknownSchema {
                    schema: schema.to_string(),
                    allowed: config.schemas.clone(),
                });
            }
            Selection::Schema(schema)
        }
    };

    let mut pipelines = Vec::new();
    for name in &config.run_order {
        let pipeline: PipelineName = name.parse()?;
        let tables = config.tables(pipeline.as_str());
        if !selection.matches(tables) {
            continue;
        }

        let all_skipped = !tables.is_empty()
            && tables
                .iter()
                .all(|t| skipped.contains(&t.name.to_ascii_uppercase()));
        if all_skipped {
            tracing::debug!(pipeline = %pipeline, "Skipping pipeline, all tables in skip list");
            continue;
        }

        pipelines.push(pipeline);
    }

    Ok(pipelines)
}

enum Selection<'a> {
    All,
    Table(&'a str),
    Schema(&'a str),
}

impl Selection<'_> {
    fn matches(&self, tables: &[TableConfig]) -> bool {
        match self {
            Selection::All => true,
            Selection::Table(name) => tables.iter().any(|t| t.name.eq_ignore_ascii_case(name)),
            Selection::Schema(schema) => tables.iter().any(|t| t.schema.eq_ignore_ascii_case(schema)),
        }
    }
}

fn required_sub_scope(scope: Scope, sub_scope: Option<&str>) -> Result<&str, ConfigError> {
    sub_scope
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingSubScope {
            scope: scope.to_string(),
        })
}

/// Upper-cased table names from a comma-separated list
fn parse_skip_list(skip: Option<&str>, config: &AppConfig) -> Result<HashSet<String>, ConfigError> {
    let known: HashSet<String> = config
        .table_names()
        .iter()
        .map(|t| t.to_ascii_uppercase())
        .collect();

    let mut skipped = HashSet::new();
    for table in skip.unwrap_or_default().split(',') {
        let table = table.trim();
        if table.is_empty() {
            continue;
        }
        let upper = table.to_ascii_uppercase();
        if !known.contains(&upper) {
            return Err(ConfigError::UnknownTable {
                table: table.to_string(),
                allowed: config.table_names(),
            });
        }
        skipped.insert(upper);
    }

    Ok(skipped)
}
