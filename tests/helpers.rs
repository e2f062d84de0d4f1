//! Test utilities for medpipe scenarios
#![allow(dead_code)]

use async_trait::async_trait;
use medpipe::catalog::{
    DocumentClassRegistry, InMemoryConfigStore, ManualClock, MemoryCache, StepCatalog,
};
use medpipe::core::config::{CatalogConfig, EngineConfig, RetryConfig};
use medpipe::core::state::{JobStatus, PipelineJob, StepExecution};
use medpipe::execution::{
    DocumentInput, ExecutionEvent, JobOptions, PipelineEngine, PipelineService,
};
use medpipe::persistence::{InMemoryJobStore, JobStateStore};
use medpipe::runner::{TaskOutput, TaskRequest, TaskRunner, TaskRunnerError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Catalog used by most scenarios:
/// validate → classify → translate → {lab_explain | discharge_summary}
/// → [fact_check ∥ grammar_check] → format → secondary_translation
pub const MEDICAL_CATALOG: &str = r#"
classes:
  - id: general
    key: GENERAL
    display_name: General medical document
    is_system: true
  - id: lab
    key: LAB_REPORT
    display_name: Laboratory report
    strong_indicators: ["reference range", "g/dl"]
  - id: discharge
    key: DISCHARGE_LETTER
    display_name: Discharge letter

steps:
  - id: validate
    name: Medical validation
    order: 1
    task_template: "Is this a medical document? Answer MEDICAL or FAIL. {{ text }}"
    output_mode: inspect
    stop_conditions:
      trigger_values: ["FAIL"]
      reason: non_medical_content
      user_message: "This does not look like a medical document."

  - id: classify
    name: Classification
    order: 2
    is_branching_step: true
    task_template: "Classify: {{ text }}"

  - id: translate
    name: Plain-language translation
    order: 3
    mandatory: true
    task_template: "Rewrite for a patient: {{ text }}"

  - id: lab_explain
    name: Lab value explanation
    order: 4
    document_class_id: lab
    task_template: "Explain the lab values: {{ text }}"

  - id: discharge_summary
    name: Discharge summary
    order: 4
    document_class_id: discharge
    task_template: "Summarize the discharge letter: {{ text }}"

  - id: fact_check
    name: Fact check
    order: 5
    concurrency_group: checks
    merge_precedence: 0
    task_template: "Check facts: {{ text }}"

  - id: grammar_check
    name: Grammar check
    order: 6
    concurrency_group: checks
    merge_precedence: 10
    task_template: "Fix grammar: {{ text }}"

  - id: format
    name: Formatting
    order: 7
    task_template: "Format: {{ text }}"

  - id: secondary_translation
    name: Secondary translation
    order: 8
    output_mode: secondary_translation
    task_template: "Translate into {{ target_language }}: {{ text }}"
"#;

/// Scripted task runner. Each step answers from its queue; the last reply
/// repeats once the queue is down to one. Unscripted steps echo their input.
#[derive(Default)]
pub struct MockTaskRunner {
    scripts: Mutex<HashMap<String, VecDeque<Result<TaskOutput, TaskRunnerError>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<TaskRequest>>,
}

impl MockTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, step_id: &str, output: &str) -> Self {
        self.sequence(step_id, vec![Ok(TaskOutput::new(output))])
    }

    pub fn respond_with_confidence(self, step_id: &str, output: &str, confidence: f64) -> Self {
        self.sequence(
            step_id,
            vec![Ok(TaskOutput::new(output).with_confidence(confidence))],
        )
    }

    pub fn fail(self, step_id: &str, error: TaskRunnerError) -> Self {
        self.sequence(step_id, vec![Err(error)])
    }

    pub fn sequence(
        self,
        step_id: &str,
        replies: Vec<Result<TaskOutput, TaskRunnerError>>,
    ) -> Self {
        self.scripts
            .lock()
            .insert(step_id.to_string(), replies.into_iter().collect());
        self
    }

    pub fn delay(mut self, step_id: &str, delay: Duration) -> Self {
        self.delays.insert(step_id.to_string(), delay);
        self
    }

    /// Step ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|r| r.step_id.clone()).collect()
    }

    pub fn call_count(&self, step_id: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.step_id == step_id).count()
    }

    /// Last request seen by a step
    pub fn last_request(&self, step_id: &str) -> Option<TaskRequest> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|r| r.step_id == step_id)
            .cloned()
    }
}

#[async_trait]
impl TaskRunner for MockTaskRunner {
    async fn run(&self, request: &TaskRequest) -> Result<TaskOutput, TaskRunnerError> {
        self.calls.lock().push(request.clone());

        if let Some(delay) = self.delays.get(&request.step_id) {
            tokio::time::sleep(*delay).await;
        }

        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&request.step_id) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(TaskOutput::new(request.input.clone()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(TaskOutput::new(request.input.clone()))),
            None => Ok(TaskOutput::new(request.input.clone())),
        }
    }
}

/// Engine config with no retry backoff
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig::immediate(),
        ..Default::default()
    }
}

/// A full engine stack over in-memory stores and a scripted runner
pub struct Harness {
    pub config_store: Arc<InMemoryConfigStore>,
    pub catalog: Arc<StepCatalog>,
    pub classes: Arc<DocumentClassRegistry>,
    pub store: Arc<InMemoryJobStore>,
    pub runner: Arc<MockTaskRunner>,
    pub service: PipelineService,
    pub clock: Arc<ManualClock>,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl Harness {
    pub fn new(yaml: &str, runner: MockTaskRunner) -> Self {
        Self::with_config(yaml, runner, test_engine_config())
    }

    pub fn with_config(yaml: &str, runner: MockTaskRunner, config: EngineConfig) -> Self {
        let catalog_config = CatalogConfig::from_yaml(yaml).expect("catalog should be valid");
        let config_store = Arc::new(InMemoryConfigStore::from_config(&catalog_config));
        let clock = Arc::new(ManualClock::new());
        let catalog = Arc::new(StepCatalog::new(
            config_store.clone(),
            Arc::new(MemoryCache::with_clock(clock.clone())),
            config.catalog_ttl(),
        ));
        let classes = Arc::new(DocumentClassRegistry::new(catalog.clone()));
        let store = Arc::new(InMemoryJobStore::new());
        let runner = Arc::new(runner);

        let engine = PipelineEngine::new(
            catalog.clone(),
            classes.clone(),
            runner.clone(),
            store.clone(),
            config,
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().push(event));

        Self {
            config_store,
            catalog,
            classes,
            store,
            runner,
            service: PipelineService::new(Arc::new(engine)),
            clock,
            events,
        }
    }

    pub async fn run(&self, text: &str) -> PipelineJob {
        self.run_with(text, JobOptions::default()).await
    }

    pub async fn run_with(&self, text: &str, options: JobOptions) -> PipelineJob {
        let job_id = self
            .service
            .submit(Uuid::new_v4(), DocumentInput::text(text), options)
            .await
            .expect("submit should succeed");
        self.service.wait(job_id).await.expect("job should finish")
    }

    pub async fn rows(&self, job_id: Uuid) -> Vec<StepExecution> {
        self.store
            .list_step_executions(job_id)
            .await
            .expect("rows should load")
    }

    /// Step ids with an execution row, in plan order
    pub async fn executed_steps(&self, job_id: Uuid) -> Vec<String> {
        self.rows(job_id)
            .await
            .into_iter()
            .map(|r| r.step_id)
            .collect()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }
}

pub fn assert_completed(job: &PipelineJob) {
    assert_eq!(
        job.status,
        JobStatus::Completed,
        "job should be completed, error: {:?}",
        job.error
    );
    assert!(job.result.is_some(), "completed job should carry a result");
    assert_eq!(job.progress_percent, 100);
}

pub fn assert_halted(job: &PipelineJob, reason: &str) {
    assert_eq!(job.status, JobStatus::Halted, "error: {:?}", job.error);
    let signal = job.halt.as_ref().expect("halted job should carry a stop signal");
    assert_eq!(signal.reason, reason);
}

pub fn assert_failed(job: &PipelineJob, expected_error: &str) {
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.as_deref().unwrap_or_default();
    assert!(
        error.contains(expected_error),
        "job error:\n{}\n\ndoes not contain:\n{}",
        error,
        expected_error
    );
}
