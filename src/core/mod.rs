//! Core domain models for the pipelines
//!
//! This module defines the step and pipeline contracts, the output envelope
//! passed between steps, run state, configuration and scope resolution.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod scope;
pub mod state;
pub mod step;

pub use config::{AppConfig, FailurePolicy, Settings, TableConfig};
pub use context::*;
pub use error::{ClientError, ConfigError, PipelineError, StepError};
pub use pipeline::*;
pub use state::*;
pub use step::*;
