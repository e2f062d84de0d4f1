//! Step executor - runs individual steps through the task runner

use crate::core::config::RetryConfig;
use crate::core::context::JobContext;
use crate::core::state::StepExecution;
use crate::core::step::PipelineStepDefinition;
use crate::execution::cancel::CancelSignal;
use crate::execution::events::{EventBus, ExecutionEvent};
use crate::persistence::JobStateStore;
use crate::runner::{TaskRequest, TaskRunner, TaskRunnerError};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Result of a successful step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub output: String,
    /// Recorded confidence (reported value clamped to [0, 1], or 1.0)
    pub confidence: f64,
    /// Confidence as reported by the runner, if any
    pub reported_confidence: Option<f64>,
    pub metadata: serde_json::Value,
    pub attempts: u32,
}

/// A step that failed after all allowed attempts
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub error: TaskRunnerError,
    pub attempts: u32,
}

impl StepFailure {
    pub fn is_aborted(&self) -> bool {
        self.error == TaskRunnerError::Aborted
    }
}

/// Executes a single step and records its execution row
pub struct StepExecutor {
    runner: Arc<dyn TaskRunner>,
    store: Arc<dyn JobStateStore>,
    retry: RetryConfig,
    events: EventBus,
}

impl StepExecutor {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        store: Arc<dyn JobStateStore>,
        retry: RetryConfig,
        events: EventBus,
    ) -> Self {
        Self {
            runner,
            store,
            retry,
            events,
        }
    }

    /// Run one attempt of a step
    pub async fn execute(
        &self,
        step: &PipelineStepDefinition,
        input: &str,
        context: &JobContext,
        cancel: &CancelSignal,
    ) -> Result<StepResult, TaskRunnerError> {
        let mut row = StepExecution::new(context.job_id, step, input);
        let started = Instant::now();
        let result = self.attempt(step, input, context, &mut row, 1, cancel).await;
        self.finish(&mut row, &result, started).await;
        result.map(|output| StepResult { attempts: 1, ..output })
    }

    /// Run a step, retrying transient failures with exponential backoff
    pub async fn execute_with_retry(
        &self,
        step: &PipelineStepDefinition,
        input: &str,
        context: &JobContext,
        cancel: &CancelSignal,
    ) -> Result<StepResult, StepFailure> {
        let mut row = StepExecution::new(context.job_id, step, input);
        let started = Instant::now();
        let max_attempts = step.max_attempts();
        let mut attempt = 1;

        loop {
            let result = self
                .attempt(step, input, context, &mut row, attempt, cancel)
                .await;

            match result {
                Ok(output) => {
                    self.finish(&mut row, &Ok(output.clone()), started).await;
                    return Ok(StepResult {
                        attempts: attempt,
                        ..output
                    });
                }
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        job_id = %context.job_id,
                        step = %step.id,
                        attempt,
                        max_attempts,
                        "Transient failure, retrying in {}ms: {}",
                        delay.as_millis(),
                        error
                    );
                    self.events.emit(ExecutionEvent::StepRetrying {
                        job_id: context.job_id,
                        step_id: step.id.clone(),
                        attempt,
                        max_attempts,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });

                    row.error = Some(error.to_string());
                    self.save_row(&row).await;

                    if !self.backoff(delay, cancel).await {
                        let aborted = Err(TaskRunnerError::Aborted);
                        self.finish(&mut row, &aborted, started).await;
                        return Err(StepFailure {
                            error: TaskRunnerError::Aborted,
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                }
                Err(error) => {
                    self.finish(&mut row, &Err(error.clone()), started).await;
                    return Err(StepFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Sleep before the next attempt; false if the job was cancelled meanwhile
    async fn backoff(&self, delay: Duration, cancel: &CancelSignal) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = cancel.hard_cancelled() => false,
            _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
        }
    }

    async fn attempt(
        &self,
        step: &PipelineStepDefinition,
        input: &str,
        context: &JobContext,
        row: &mut StepExecution,
        attempt: u32,
        cancel: &CancelSignal,
    ) -> Result<StepResult, TaskRunnerError> {
        row.begin_attempt(attempt);
        self.save_row(row).await;

        info!(job_id = %context.job_id, step = %step.id, attempt, "Executing step");
        self.events.emit(ExecutionEvent::StepStarted {
            job_id: context.job_id,
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            attempt,
        });

        let variables = context.get_rendering_variables(input);
        let missing = step.missing_variables(&variables);
        if !missing.is_empty() {
            return Err(TaskRunnerError::Fatal(format!(
                "missing required context variables: {}",
                missing.join(", ")
            )));
        }

        let request = TaskRequest {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            task_template: step.task_template.clone(),
            model_reference: step.model_reference.clone(),
            input: input.to_string(),
            variables,
        };
        debug!(step = %step.id, "Rendered task: {}", request.rendered());

        let call = async {
            match step.timeout_secs {
                Some(secs) => timeout(Duration::from_secs(secs), self.runner.run(&request))
                    .await
                    .unwrap_or(Err(TaskRunnerError::Timeout(secs))),
                None => self.runner.run(&request).await,
            }
        };

        let output = tokio::select! {
            biased;
            _ = cancel.hard_cancelled() => Err(TaskRunnerError::Aborted),
            result = call => result,
        }?;

        let reported = output.reported_confidence();
        Ok(StepResult {
            output: output.output,
            confidence: reported.unwrap_or(1.0),
            reported_confidence: reported,
            metadata: output.metadata,
            attempts: attempt,
        })
    }

    async fn finish(
        &self,
        row: &mut StepExecution,
        result: &Result<StepResult, TaskRunnerError>,
        started: Instant,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(output) => {
                info!(
                    job_id = %row.job_id,
                    step = %row.step_id,
                    duration_ms,
                    confidence = output.confidence,
                    "Step completed"
                );
                row.succeed(
                    &output.output,
                    output.confidence,
                    output.metadata.clone(),
                    duration_ms,
                );
            }
            Err(error) => {
                warn!(job_id = %row.job_id, step = %row.step_id, "Step failed: {}", error);
                row.fail(error.to_string(), duration_ms);
            }
        }
        self.save_row(row).await;
    }

    async fn save_row(&self, row: &StepExecution) {
        if let Err(e) = self.store.save_step_execution(row).await {
            warn!(
                job_id = %row.job_id,
                step = %row.step_id,
                "Failed to record step execution: {:#}",
                e
            );
        }
    }
}
