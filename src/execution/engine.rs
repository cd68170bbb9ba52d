//! Main execution engine - drives a pipeline's steps in order

use crate::core::{
    FailurePolicy, Pipeline, PipelineError, PipelineName, PipelineState, RunReport, StepName,
    StepOutput, StepProvider, StepRecord,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline: PipelineName,
        total_steps: usize,
    },
    StepStarted {
        run_id: Uuid,
        step: StepName,
        index: usize,
    },
    StepFinished {
        run_id: Uuid,
        step: StepName,
        success: bool,
    },
    PipelineSkipped {
        run_id: Uuid,
        pipeline: PipelineName,
        step: StepName,
    },
    PipelineCompleted {
        run_id: Uuid,
        pipeline: PipelineName,
        status: PipelineState,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Sequential pipeline executor
///
/// Each step is created from the previous step's output, run, and its output
/// replaces the running output. A step output carrying `skip_pipeline` ends
/// the run. Step errors are not caught: they end the run as `Failed` and
/// come back as a `PipelineError` carrying the run's report.
pub struct ExecutionEngine {
    policy: FailurePolicy,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            event_handlers: Vec::new(),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    pub async fn execute<P>(
        &self,
        pipeline: &P,
        steps: &dyn StepProvider,
    ) -> Result<RunReport, PipelineError>
    where
        P: Pipeline + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", pipeline = %pipeline.name(), %run_id);
        self.run_steps(run_id, pipeline, steps).instrument(span).await
    }

    async fn run_steps<P>(
        &self,
        run_id: Uuid,
        pipeline: &P,
        steps: &dyn StepProvider,
    ) -> Result<RunReport, PipelineError>
    where
        P: Pipeline + ?Sized,
    {
        let name = pipeline.name();
        let step_names = pipeline.build_steps();
        let options = pipeline.step_options();
        let started_at = Utc::now();

        info!(steps = step_names.len(), policy = %self.policy, "Starting pipeline");
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline: name,
            total_steps: step_names.len(),
        });

        let mut state = PipelineState::Pending;
        let mut records = Vec::with_capacity(step_names.len());
        let mut output = StepOutput::default();

        for (index, step_name) in step_names.iter().copied().enumerate() {
            state = PipelineState::Running(step_name);
            self.emit_event(ExecutionEvent::StepStarted {
                run_id,
                step: step_name,
                index,
            });

            let step_span = info_span!("step", step = %step_name);
            let created = {
                let _entered = step_span.enter();
                debug!("Creating step");
                steps.create_step(step_name, output, &options)
            };
            let mut step = match created {
                Ok(step) => step,
                Err(source) => {
                    error!(parent: &step_span, error = %source, "Failed to create step");
                    let report = self.finish(
                        run_id,
                        name,
                        PipelineState::Failed(step_name),
                        records,
                        step_names.len(),
                        started_at,
                    );
                    return Err(PipelineError::StepCreation {
                        pipeline: name,
                        step: step_name,
                        source,
                        report: Box::new(report),
                    });
                }
            };

            let step_started = Utc::now();
            let outcome = match step.run().instrument(step_span.clone()).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    error!(parent: &step_span, error = %source, "Step failed");
                    records.push(StepRecord {
                        name: step_name,
                        success: false,
                        started_at: step_started,
                        finished_at: Utc::now(),
                    });
                    self.emit_event(ExecutionEvent::StepFinished {
                        run_id,
                        step: step_name,
                        success: false,
                    });
                    let report = self.finish(
                        run_id,
                        name,
                        PipelineState::Failed(step_name),
                        records,
                        step_names.len(),
                        started_at,
                    );
                    return Err(PipelineError::Step {
                        pipeline: name,
                        step: step_name,
                        source,
                        report: Box::new(report),
                    });
                }
            };

            let success = outcome.success;
            records.push(StepRecord {
                name: step_name,
                success,
                started_at: step_started,
                finished_at: Utc::now(),
            });
            self.emit_event(ExecutionEvent::StepFinished {
                run_id,
                step: step_name,
                success,
            });

            if success {
                info!(parent: &step_span, "Step finished");
            } else {
                warn!(parent: &step_span, "Step reported failure");
            }

            output = outcome.output;

            if output.skip_pipeline {
                info!(step = %step_name, "Skip signal received, stopping pipeline");
                state = PipelineState::Skipped(step_name);
                self.emit_event(ExecutionEvent::PipelineSkipped {
                    run_id,
                    pipeline: name,
                    step: step_name,
                });
                break;
            }

            if !success && self.policy == FailurePolicy::AbortOnFailure {
                warn!(step = %step_name, "Aborting pipeline after failed step");
                state = PipelineState::Failed(step_name);
                break;
            }
        }

        if !state.is_terminal() {
            state = PipelineState::Completed;
        }

        Ok(self.finish(
            run_id,
            name,
            state,
            records,
            step_names.len(),
            started_at,
        ))
    }

    /// Close the run: build its report and announce the final state
    fn finish(
        &self,
        run_id: Uuid,
        pipeline: PipelineName,
        status: PipelineState,
        steps: Vec<StepRecord>,
        total_steps: usize,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let report = RunReport {
            run_id,
            pipeline,
            status,
            steps,
            total_steps,
            started_at,
            finished_at: Utc::now(),
        };

        info!(status = %report.status, "Pipeline finished");
        self.emit_event(ExecutionEvent::PipelineCompleted {
            run_id,
            pipeline,
            status: report.status,
        });
        report
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}
