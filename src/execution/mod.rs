//! Pipeline execution engine

pub mod batch;
pub mod engine;

pub use batch::{run_batch, PipelineRunner};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
