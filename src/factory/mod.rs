//! Name-based construction of pipelines and steps

pub mod pipeline_factory;
pub mod step_factory;

pub use pipeline_factory::PipelineFactory;
pub use step_factory::StepFactory;
