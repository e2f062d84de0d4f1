//! Main execution engine - orchestrates a job from extraction to result
//!
//! Stages: EXTRACTING → VALIDATING → CLASSIFYING → PROCESSING → FINALIZING.
//! Universal steps before the branching step run first; the branching step's
//! output picks the document class; the remaining plan is re-resolved for that
//! class and run in batches. Every batch is joined before the next starts and
//! every member's output is checked against its stop conditions.

use crate::catalog::{CatalogError, DocumentClassRegistry, StepCatalog};
use crate::core::condition::{StopConditionEvaluator, StopSignal};
use crate::core::config::EngineConfig;
use crate::core::context::JobContext;
use crate::core::document_class::DocumentClass;
use crate::core::plan::{
    resolve_finalizing, resolve_plan, resolve_post_branching, resolve_pre_branching,
    CatalogSnapshot,
};
use crate::core::state::{aggregate_confidence, EngineStage, PipelineJob, ResultBundle};
use crate::core::step::PipelineStepDefinition;
use crate::execution::cancel::CancelSignal;
use crate::execution::events::{EventBus, ExecutionEvent};
use crate::execution::executor::{StepExecutor, StepFailure, StepResult};
use crate::execution::group::merge_outputs;
use crate::execution::scheduler::{ExecutionScheduler, StepBatch};
use crate::persistence::JobStateStore;
use crate::runner::{ExtractionError, PlainTextExtractor, TaskRunner, TextExtractor};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Job-level failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// No enabled steps, missing branching step, unreachable catalog
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("job timed out after {0} seconds")]
    Timeout(u64),

    #[error("job cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// A document submitted for processing
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl DocumentInput {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    /// A plain-text document
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into().into_bytes(), "text/plain")
    }
}

/// Per-job options supplied at submission
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Request a secondary-language translation
    pub target_language: Option<String>,
    /// Extra template variables
    pub variables: HashMap<String, String>,
}

impl JobOptions {
    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }
}

enum RunOutcome {
    Completed(ResultBundle),
    Halted(StopSignal),
}

/// Mutable state threaded through one run
struct WorkState {
    text: String,
    secondary: Option<String>,
    reported: Vec<Option<f64>>,
    steps_executed: usize,
    degraded: Vec<String>,
    executed: HashSet<String>,
}

impl WorkState {
    fn new(text: String) -> Self {
        Self {
            text,
            secondary: None,
            reported: Vec::new(),
            steps_executed: 0,
            degraded: Vec::new(),
            executed: HashSet::new(),
        }
    }
}

/// Main pipeline execution engine
pub struct PipelineEngine {
    catalog: Arc<StepCatalog>,
    classes: Arc<DocumentClassRegistry>,
    extractor: Arc<dyn TextExtractor>,
    executor: StepExecutor,
    store: Arc<dyn JobStateStore>,
    scheduler: ExecutionScheduler,
    evaluator: StopConditionEvaluator,
    config: EngineConfig,
    events: EventBus,
}

impl PipelineEngine {
    pub fn new(
        catalog: Arc<StepCatalog>,
        classes: Arc<DocumentClassRegistry>,
        runner: Arc<dyn TaskRunner>,
        store: Arc<dyn JobStateStore>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new();
        let executor = StepExecutor::new(runner, store.clone(), config.retry.clone(), events.clone());

        Self {
            catalog,
            classes,
            extractor: Arc::new(PlainTextExtractor),
            executor,
            store,
            scheduler: ExecutionScheduler::new(config.scheduling),
            evaluator: StopConditionEvaluator::new(),
            config,
            events,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStateStore> {
        &self.store
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    /// Run a pending job to a terminal state. The returned job has been persisted.
    pub async fn run(
        &self,
        mut job: PipelineJob,
        document: DocumentInput,
        options: JobOptions,
        cancel: CancelSignal,
    ) -> PipelineJob {
        let job_id = job.job_id;

        let snapshot = match self.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(job_id = %job_id, "Job cannot start: {}", e);
                job.fail(e.to_string());
                return self.finish(job).await;
            }
        };

        job.start();
        if let Err(e) = self.persist(&job).await {
            job.fail(e.to_string());
            return self.finish(job).await;
        }

        let planned = resolve_plan(&snapshot, None, job.target_language.is_some()).len();
        info!(job_id = %job_id, steps = snapshot.len(), "Starting job");
        self.events.emit(ExecutionEvent::JobStarted {
            job_id,
            planned_steps: planned,
        });

        let started = Instant::now();
        let ceiling = self.config.job_timeout();
        let outcome = tokio::time::timeout(
            ceiling,
            self.drive(&mut job, &snapshot, &document, &options, &cancel, started),
        )
        .await
        .unwrap_or(Err(EngineError::Timeout(self.config.job_timeout_secs)));

        match outcome {
            Ok(RunOutcome::Completed(bundle)) => {
                info!(
                    job_id = %job_id,
                    confidence = bundle.aggregate_confidence,
                    elapsed_ms = bundle.total_time_ms,
                    "Job completed"
                );
                job.complete(bundle);
            }
            Ok(RunOutcome::Halted(signal)) => {
                info!(
                    job_id = %job_id,
                    step = %signal.step_id,
                    matched = %signal.matched_value,
                    "Job halted by stop condition"
                );
                self.events.emit(ExecutionEvent::JobHalted {
                    job_id,
                    step_id: signal.step_id.clone(),
                    reason: signal.reason.clone(),
                });
                job.halt(signal);
            }
            Err(e) => {
                error!(job_id = %job_id, "Job failed: {}", e);
                if let Err(store_err) = self.store.abandon_running_steps(job_id, &e.to_string()).await
                {
                    warn!(job_id = %job_id, "Failed to close running steps: {:#}", store_err);
                }
                job.fail(e.to_string());
            }
        }

        self.finish(job).await
    }

    async fn load_snapshot(&self) -> Result<CatalogSnapshot, EngineError> {
        let snapshot = self.catalog.snapshot().await?;
        if snapshot.is_empty() {
            return Err(EngineError::Configuration("no enabled steps".to_string()));
        }
        if self.config.require_branching_step && snapshot.branching_step().is_none() {
            return Err(EngineError::Configuration(
                "no enabled branching step".to_string(),
            ));
        }
        Ok(snapshot)
    }

    async fn drive(
        &self,
        job: &mut PipelineJob,
        snapshot: &CatalogSnapshot,
        document: &DocumentInput,
        options: &JobOptions,
        cancel: &CancelSignal,
        started: Instant,
    ) -> Result<RunOutcome, EngineError> {
        let mut context =
            JobContext::new(job.job_id).with_target_language(job.target_language.clone());
        for (key, value) in &options.variables {
            context.set_variable(key.clone(), value.clone());
        }

        // EXTRACTING
        self.enter_stage(job, EngineStage::Extracting).await?;
        let extracted = self
            .extractor
            .extract(&document.bytes, &document.content_type)
            .await?;
        context.set_variable("extraction_confidence", extracted.confidence.to_string());
        let mut state = WorkState::new(extracted.text);

        // VALIDATING: universal steps ahead of the branching step
        self.enter_stage(job, EngineStage::Validating).await?;
        if state.text.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "document contains no text".to_string(),
            ));
        }

        let pre = resolve_pre_branching(snapshot);
        let branching = snapshot.branching_step().cloned();
        let pre_batches = self.scheduler.batches(&pre);
        let (validation, classification): (Vec<StepBatch>, Vec<StepBatch>) = pre_batches
            .into_iter()
            .partition(|batch| match &branching {
                Some(step) => !batch.contains(&step.id),
                None => true,
            });

        if let Some(signal) = self
            .run_batches(job, &mut context, &mut state, &validation, EngineStage::Validating, cancel)
            .await?
        {
            return Ok(RunOutcome::Halted(signal));
        }

        // CLASSIFYING: the class is recorded before a halt from this stage is honoured
        self.enter_stage(job, EngineStage::Classifying).await?;
        let halted = self
            .run_batches(
                job,
                &mut context,
                &mut state,
                &classification,
                EngineStage::Classifying,
                cancel,
            )
            .await?;
        if let Some(signal) = halted {
            let classified = branching
                .as_ref()
                .is_some_and(|step| context.get_step_output(&step.id).is_some());
            if classified {
                self.record_class(job, &mut context, branching.as_ref())
                    .await?;
            }
            return Ok(RunOutcome::Halted(signal));
        }

        let class = self
            .record_class(job, &mut context, branching.as_ref())
            .await?;
        let class_id = class.as_ref().map(|c| c.id.clone());

        // PROCESSING: class-scoped steps interleaved with remaining universal steps
        self.enter_stage(job, EngineStage::Processing).await?;
        let post = resolve_post_branching(snapshot, class_id.as_deref(), &state.executed);
        let post_batches = self.scheduler.batches(&post);
        if let Some(signal) = self
            .run_batches(
                job,
                &mut context,
                &mut state,
                &post_batches,
                EngineStage::Processing,
                cancel,
            )
            .await?
        {
            return Ok(RunOutcome::Halted(signal));
        }

        // FINALIZING
        self.enter_stage(job, EngineStage::Finalizing).await?;
        let finalizing = resolve_finalizing(
            snapshot,
            class_id.as_deref(),
            job.target_language.is_some(),
        );
        let final_batches = self.scheduler.batches(&finalizing);
        if let Some(signal) = self
            .run_batches(
                job,
                &mut context,
                &mut state,
                &final_batches,
                EngineStage::Finalizing,
                cancel,
            )
            .await?
        {
            return Ok(RunOutcome::Halted(signal));
        }

        Ok(RunOutcome::Completed(ResultBundle {
            final_text: state.text,
            secondary_translation: state.secondary,
            target_language: job.target_language.clone(),
            detected_class: context.detected_class,
            aggregate_confidence: aggregate_confidence(state.reported),
            total_time_ms: started.elapsed().as_millis() as u64,
            steps_executed: state.steps_executed,
            degraded_steps: state.degraded,
        }))
    }

    /// Detect the class and store its key on the context and the job
    async fn record_class(
        &self,
        job: &mut PipelineJob,
        context: &mut JobContext,
        branching: Option<&PipelineStepDefinition>,
    ) -> Result<Option<DocumentClass>, EngineError> {
        let class = self.detect_class(job, context, branching).await?;
        context.detected_class = class.as_ref().map(|c| c.key.clone());
        job.detected_document_class = context.detected_class.clone();
        self.persist(job).await?;
        Ok(class)
    }

    /// Map the branching output to a class, falling back to the configured default
    async fn detect_class(
        &self,
        job: &PipelineJob,
        context: &JobContext,
        branching: Option<&PipelineStepDefinition>,
    ) -> Result<Option<DocumentClass>, EngineError> {
        let output = branching.and_then(|step| context.get_step_output(&step.id));

        let matched = match (branching, output) {
            (Some(step), Some(output)) => {
                self.classes
                    .resolve_token(output, step.branching_field.as_deref())
                    .await?
            }
            _ => None,
        };

        let (class, fallback) = match matched {
            Some(class) => (Some(class), false),
            None => {
                let default = self
                    .classes
                    .get_by_key(&self.config.default_class_key)
                    .await?
                    .filter(|c| c.enabled);
                if default.is_none() {
                    warn!(
                        job_id = %job.job_id,
                        default_class = %self.config.default_class_key,
                        "Default class unavailable; continuing with universal steps only"
                    );
                } else if branching.is_some() {
                    warn!(
                        job_id = %job.job_id,
                        output = ?output,
                        "Unrecognized class token, using default class"
                    );
                }
                (default, true)
            }
        };

        info!(
            job_id = %job.job_id,
            class = ?class.as_ref().map(|c| c.key.as_str()),
            fallback,
            "Document class detected"
        );
        self.events.emit(ExecutionEvent::ClassDetected {
            job_id: job.job_id,
            class_key: class.as_ref().map(|c| c.key.clone()),
            fallback,
        });
        Ok(class)
    }

    /// Run batches in order. Returns the stop signal if one fired.
    async fn run_batches(
        &self,
        job: &mut PipelineJob,
        context: &mut JobContext,
        state: &mut WorkState,
        batches: &[StepBatch],
        stage: EngineStage,
        cancel: &CancelSignal,
    ) -> Result<Option<StopSignal>, EngineError> {
        let total_steps: usize = batches.iter().map(StepBatch::len).sum();
        let mut steps_done = 0;

        for batch in batches {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            job.current_step = Some(batch.label());
            self.persist(job).await?;

            let input = state.text.clone();
            let results: Vec<Result<StepResult, StepFailure>> = {
                let shared: &JobContext = context;
                join_all(batch.steps.iter().map(|step| {
                    self.executor
                        .execute_with_retry(step, &input, shared, cancel)
                })).await
            };

            if cancel.is_hard() || results.iter().any(|r| matches!(r, Err(f) if f.is_aborted())) {
                return Err(EngineError::Cancelled);
            }

            steps_done += batch.len();
            job.advance_progress(stage.progress_at(steps_done, total_steps));

            let mut succeeded: Vec<(&PipelineStepDefinition, &StepResult)> = Vec::new();
            let mut members: Vec<_> = batch.steps.iter().zip(results.iter()).collect();
            members.sort_by_key(|(step, _)| step.order);

            for (step, result) in members {
                state.executed.insert(step.id.clone());
                match result {
                    Ok(output) => {
                        context.set_step_output(&step.id, output.output.clone());
                        state.reported.push(output.reported_confidence);
                        state.steps_executed += 1;
                        self.events.emit(ExecutionEvent::StepCompleted {
                            job_id: job.job_id,
                            step_id: step.id.clone(),
                            progress: job.progress_percent,
                        });

                        if let Some(signal) = self.evaluator.evaluate(step, &output.output) {
                            return Ok(Some(signal));
                        }
                        succeeded.push((step, output));
                    }
                    Err(failure) if step.mandatory => {
                        self.events.emit(ExecutionEvent::StepFailed {
                            job_id: job.job_id,
                            step_id: step.id.clone(),
                            error: failure.error.to_string(),
                        });
                        return Err(EngineError::StepFailed {
                            step: step.name.clone(),
                            message: failure.error.to_string(),
                        });
                    }
                    Err(failure) => {
                        warn!(
                            job_id = %job.job_id,
                            step = %step.id,
                            attempts = failure.attempts,
                            "Step degraded to pass-through: {}",
                            failure.error
                        );
                        state.degraded.push(step.id.clone());
                        self.events.emit(ExecutionEvent::StepDegraded {
                            job_id: job.job_id,
                            step_id: step.id.clone(),
                            error: failure.error.to_string(),
                        });
                    }
                }
            }

            let merged = merge_outputs(&input, &succeeded);
            if batch.is_concurrent() {
                info!(
                    job_id = %job.job_id,
                    group = ?batch.group,
                    winner = ?merged.winner,
                    "Merged concurrency group"
                );
            }
            state.text = merged.text;
            if merged.secondary.is_some() {
                state.secondary = merged.secondary;
            }

            self.persist(job).await?;
        }

        Ok(None)
    }

    async fn enter_stage(&self, job: &mut PipelineJob, stage: EngineStage) -> Result<(), EngineError> {
        job.enter_stage(stage);
        job.current_step = None;
        self.events.emit(ExecutionEvent::StageEntered {
            job_id: job.job_id,
            stage,
            progress: job.progress_percent,
        });
        self.persist(job).await
    }

    async fn persist(&self, job: &PipelineJob) -> Result<(), EngineError> {
        self.store
            .save_job(job)
            .await
            .map_err(|e| EngineError::Persistence(format!("{:#}", e)))
    }

    async fn finish(&self, job: PipelineJob) -> PipelineJob {
        if let Err(e) = self.store.save_job(&job).await {
            error!(job_id = %job.job_id, "Failed to persist final job state: {:#}", e);
        }
        self.events.emit(ExecutionEvent::JobFinished {
            job_id: job.job_id,
            status: job.status,
            error: job.error.clone(),
        });
        job
    }
}
