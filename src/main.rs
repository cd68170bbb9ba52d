use anyhow::{Context, Result};
use async_trait::async_trait;
use market_pipeline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use market_pipeline::cli::output::*;
use market_pipeline::cli::{Cli, Command};
use market_pipeline::clients::ApiKeys;
use market_pipeline::core::{scope, ConfigError};
use market_pipeline::execution::{run_batch, ExecutionEngine, ExecutionEvent, PipelineRunner};
use market_pipeline::persistence::{
    HistoryBackend, InMemoryHistory, RunSummary, SqliteHistoryStore,
};
use market_pipeline::{
    AppConfig, FailurePolicy, PipelineError, PipelineFactory, PipelineName, RunReport, Settings,
    StepFactory,
};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();
    let config = AppConfig::load(cli.config.as_deref());

    // RUST_LOG wins, then --verbose, then the configured level
    let level = match (&config, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.logging_level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to set logging subscriber: {err}"))?;

    match &cli.command {
        Command::Validate(cmd) => validate_config(cmd, config)?,
        Command::Run(cmd) => run_pipelines(cmd, config.context("Failed to load config")?).await?,
        Command::List(cmd) => list_pipelines(cmd, config.context("Failed to load config")?)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn run_pipelines(cmd: &RunCommand, config: AppConfig) -> Result<()> {
    let pipelines = scope::resolve(
        cmd.scope,
        cmd.sub_scope.as_deref(),
        cmd.skip.as_deref(),
        &config,
    )?;
    if pipelines.is_empty() {
        println!("{}No pipelines in scope {}", INFO, style(cmd.scope).bold());
        return Ok(());
    }

    let policy = cmd.failure_policy.unwrap_or(config.failure_policy);
    let config = Arc::new(config);
    let keys = ApiKeys::from_env();

    let history: Arc<dyn HistoryBackend> = if cmd.no_history {
        Arc::new(InMemoryHistory::new())
    } else {
        Arc::new(SqliteHistoryStore::with_default_path().await?)
    };

    println!(
        "{}Running {} pipeline(s), failure policy {}",
        INFO,
        style(pipelines.len()).cyan(),
        style(policy).bold()
    );

    let runner = TerminalRunner { keys, policy };
    let result = run_batch(&pipelines, &config, &runner, history.as_ref()).await;
    println!("{}", style(separator()).dim());

    let reports = match result {
        Ok(reports) => reports,
        Err(err) => {
            println!("{}{}", CROSS, style(&err).red());
            println!("{}Batch stopped", CROSS);
            std::process::exit(1);
        }
    };

    let failed: Vec<PipelineName> = reports
        .iter()
        .filter(|report| !report.succeeded())
        .map(|report| report.pipeline)
        .collect();
    if failed.is_empty() {
        println!("{}All pipelines finished {}", CHECK, style("successfully").green());
        Ok(())
    } else {
        for name in &failed {
            println!("{}{} {}", CROSS, style(name).bold(), style("failed").red());
        }
        std::process::exit(1);
    }
}

/// Runs each pipeline with a progress bar and prints its report
struct TerminalRunner {
    keys: ApiKeys,
    policy: FailurePolicy,
}

#[async_trait]
impl PipelineRunner for TerminalRunner {
    async fn run(&self, settings: Settings) -> Result<RunReport, PipelineError> {
        println!("{}", style(separator()).dim());
        let pipeline = PipelineFactory::new(settings.clone()).create()?;
        let steps = StepFactory::connect(settings, &self.keys).await?;

        let progress = create_progress_bar(pipeline.build_steps().len());
        let bar = progress.clone();
        let mut engine = ExecutionEngine::new(self.policy);
        engine.add_event_handler(move |event| {
            match &event {
                ExecutionEvent::StepStarted { step, .. } => bar.set_message(step.to_string()),
                ExecutionEvent::StepFinished { .. } => bar.inc(1),
                _ => {}
            }
            bar.println(format_execution_event(&event));
        });

        let result = engine.execute(pipeline.as_ref(), &steps).await;
        progress.finish_and_clear();

        match &result {
            Ok(report) => print_report(report),
            Err(err) => {
                if let Some(report) = err.report() {
                    print_report(report);
                }
            }
        }
        result
    }
}

fn print_report(report: &RunReport) {
    println!(
        "  {} {} in {} ({}/{} steps)",
        style(report.pipeline).bold(),
        format_state(&report.status),
        style(format_duration(report.duration())).dim(),
        report.steps.len(),
        report.total_steps
    );
    for step in report.failed_steps() {
        println!("  {}{} reported failure", WARN, style(step.name).yellow());
    }
}

fn validate_config(cmd: &ValidateCommand, config: Result<AppConfig, ConfigError>) -> Result<()> {
    match config {
        Ok(config) => {
            let pipelines: Vec<PipelineName> = config
                .run_order
                .iter()
                .map(|name| name.parse())
                .collect::<Result<_, _>>()?;

            if cmd.json {
                let data = json!({
                    "valid": true,
                    "client": config.client.kind.as_str(),
                    "failure_policy": config.failure_policy.to_string(),
                    "run_order": pipelines,
                    "tables": config.table_names(),
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Configuration is valid!", CHECK);
                println!("  Client: {}", style(config.client.kind).bold());
                println!("  Failure policy: {}", style(config.failure_policy).bold());
                println!("  Pipelines: {}", style(pipelines.len()).cyan());
                println!("  Tables: {}", style(config.table_names().len()).cyan());
            }
            Ok(())
        }
        Err(err) => {
            if cmd.json {
                let data = json!({
                    "valid": false,
                    "error": err.key(),
                    "message": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Validation failed:", CROSS);
                println!("  {}", style(&err).red());
            }
            std::process::exit(1);
        }
    }
}

fn list_pipelines(cmd: &ListCommand, config: AppConfig) -> Result<()> {
    let config = Arc::new(config);
    let mut data = Vec::new();

    for name in &config.run_order {
        let settings = Settings::new(name.as_str(), Arc::clone(&config));
        let pipeline = PipelineFactory::new(settings.clone()).create()?;
        let steps: Vec<&str> = pipeline.build_steps().iter().map(|s| s.as_str()).collect();
        let tables: Vec<String> = settings
            .pipeline_tables()
            .iter()
            .map(|t| t.qualified_name())
            .collect();

        if !cmd.json {
            println!("{}", style(pipeline.name()).bold());
            println!("  Steps: {}", style(steps.join(" -> ")).cyan());
            println!("  Tables: {}", style(tables.join(", ")).dim());
        }
        data.push(json!({
            "name": pipeline.name(),
            "steps": steps,
            "tables": tables,
        }));
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteHistoryStore::with_default_path().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID")?;
        match store.load_run(run_id).await? {
            Some(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
            Some(run) => print_run_details(&run),
            None => println!("{}Run not found", WARN),
        }
        return Ok(());
    }

    let pipeline = cmd
        .pipeline
        .as_deref()
        .map(str::parse::<PipelineName>)
        .transpose()?;
    let runs = store.list_runs(pipeline, cmd.limit).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("{}No runs found", INFO);
        return Ok(());
    }

    println!("{}Run history (showing latest {}):", INFO, cmd.limit);
    for run in &runs {
        println!("  {}", format_run_summary(run));
    }
    Ok(())
}

fn print_run_details(run: &RunSummary) {
    println!("{}Run Details", INFO);
    println!("  ID: {}", style(run.run_id).cyan());
    println!("  Pipeline: {}", style(run.pipeline).bold());
    println!("  Status: {}", format_state(&run.status));
    println!("  Started: {}", style(run.started_at.to_rfc3339()).dim());
    println!("  Duration: {}", style(format_duration(run.duration())).dim());
    println!(
        "  Progress: {} ({}/{}, {} failed)",
        style(format!("{:.0}%", run.progress() * 100.0)).cyan(),
        run.completed_steps,
        run.total_steps,
        run.failed_steps
    );
}
