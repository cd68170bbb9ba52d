//! market-pipeline - incremental market data pipelines
//!
//! Each pipeline is an ordered list of named steps. Steps are created one at
//! a time from the previous step's output, so a checker can end the run
//! early when there is nothing new to fetch.

pub mod cli;
pub mod clients;
pub mod common_steps;
pub mod core;
pub mod execution;
pub mod factory;
pub mod persistence;
pub mod pipelines;
pub mod util;

// Re-export commonly used types
pub use core::{
    AppConfig, FailurePolicy, Pipeline, PipelineError, PipelineName, PipelineState, RunReport,
    Settings, Step, StepName, StepOutcome, StepOutput, StepProvider,
};
pub use execution::{ExecutionEngine, ExecutionEvent};
pub use factory::{PipelineFactory, StepFactory};
