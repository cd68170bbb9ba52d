//! CLI output formatting

use crate::core::PipelineState;
use crate::execution::ExecutionEvent;
use crate::persistence::RunSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Create a progress bar over a pipeline's steps
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule across the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width.min(120))
}

/// Format a pipeline state for display
pub fn format_state(state: &PipelineState) -> String {
    let label = match state.step() {
        Some(step) => format!("{} ({step})", state.label().to_uppercase()),
        None => state.label().to_uppercase(),
    };
    match state {
        PipelineState::Pending => style(label).dim().to_string(),
        PipelineState::Running(_) => style(label).yellow().to_string(),
        PipelineState::Completed => style(label).green().to_string(),
        PipelineState::Skipped(_) => style(label).cyan().to_string(),
        PipelineState::Failed(_) => style(label).red().to_string(),
    }
}

fn state_icon(state: &PipelineState) -> Emoji<'static, 'static> {
    match state {
        PipelineState::Completed => CHECK,
        PipelineState::Skipped(_) => SKIP,
        PipelineState::Failed(_) => CROSS,
        PipelineState::Running(_) => SPINNER,
        PipelineState::Pending => INFO,
    }
}

/// One history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    format!(
        "{}{} - {} - {} ({}/{}) - {} - {}",
        state_icon(&summary.status),
        style(&summary.run_id.to_string()[..8]).dim(),
        style(summary.pipeline).bold(),
        format_state(&summary.status),
        summary.completed_steps,
        summary.total_steps,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline,
            total_steps,
        } => format!(
            "{}Starting {} ({} steps, {})",
            ROCKET,
            style(pipeline).bold(),
            total_steps,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted { step, index, .. } => {
            format!("{}[{}] {}", SPINNER, index + 1, style(step).cyan())
        }
        ExecutionEvent::StepFinished { step, success, .. } => {
            if *success {
                format!("{}{}", CHECK, style(step).green())
            } else {
                format!("{}{} reported failure", WARN, style(step).yellow())
            }
        }
        ExecutionEvent::PipelineSkipped { pipeline, step, .. } => format!(
            "{}{} has nothing to do (signalled by {})",
            SKIP,
            style(pipeline).bold(),
            style(step).cyan()
        ),
        ExecutionEvent::PipelineCompleted {
            pipeline, status, ..
        } => format!(
            "{}{} {}",
            state_icon(status),
            style(pipeline).bold(),
            format_state(status)
        ),
    }
}

/// Human-readable duration, e.g. `1m 05s`
pub fn format_duration(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    let secs = millis / 1000;
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, (millis % 1000) / 100)
    }
}
