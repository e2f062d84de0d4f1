//! Test: Retry, degradation and mandatory failure

use crate::helpers::*;
use medpipe::core::state::StepStatus;
use medpipe::execution::ExecutionEvent;
use medpipe::runner::{TaskOutput, TaskRunnerError};

const CATALOG: &str = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - id: translate
    name: Translate
    order: 2
    mandatory: true
    max_retries: 2
    task_template: "{{ text }}"
  - id: simplify
    name: Simplify
    order: 3
    max_retries: 1
    task_template: "{{ text }}"
  - { id: format, name: Format, order: 4, task_template: "{{ text }}" }
"#;

fn transient() -> TaskRunnerError {
    TaskRunnerError::Transient("rate limited".into())
}

/// max_retries = k with an always-transient failure means exactly k+1 attempts
#[tokio::test]
async fn test_mandatory_step_exhausts_retries_and_fails_job() {
    let runner = MockTaskRunner::new().fail("translate", transient());
    let harness = Harness::new(CATALOG, runner);

    let job = harness.run("note").await;

    assert_failed(&job, "step 'Translate' failed");
    assert_eq!(harness.runner.call_count("translate"), 3);
    assert_eq!(harness.runner.call_count("simplify"), 0);

    let rows = harness.rows(job.job_id).await;
    let translate = rows.iter().find(|r| r.step_id == "translate").unwrap();
    assert_eq!(translate.status, StepStatus::Failed);
    assert_eq!(translate.retry_count, 2);
    assert!(translate.error.as_deref().unwrap().contains("rate limited"));

    let retries = harness
        .events()
        .into_iter()
        .filter(|e| matches!(e, ExecutionEvent::StepRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let runner = MockTaskRunner::new().sequence(
        "translate",
        vec![
            Err(transient()),
            Err(TaskRunnerError::Timeout(30)),
            Ok(TaskOutput::new("plain words")),
        ],
    );
    let harness = Harness::new(CATALOG, runner);

    let job = harness.run("note").await;

    assert_completed(&job);
    assert_eq!(job.result.unwrap().final_text, "plain words");
    assert_eq!(harness.runner.call_count("translate"), 3);

    let rows = harness.rows(job.job_id).await;
    let translate = rows.iter().find(|r| r.step_id == "translate").unwrap();
    assert_eq!(translate.status, StepStatus::Completed);
    assert_eq!(translate.retry_count, 2);
    assert!(translate.error.is_none());
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let runner =
        MockTaskRunner::new().fail("translate", TaskRunnerError::Fatal("invalid template".into()));
    let harness = Harness::new(CATALOG, runner);

    let job = harness.run("note").await;

    assert_failed(&job, "invalid template");
    assert_eq!(harness.runner.call_count("translate"), 1);
}

/// A non-mandatory failure passes its input through and the job continues
#[tokio::test]
async fn test_optional_step_degrades_to_pass_through() {
    let runner = MockTaskRunner::new()
        .respond("translate", "translated")
        .fail("simplify", transient());
    let harness = Harness::new(CATALOG, runner);

    let job = harness.run("note").await;

    assert_completed(&job);
    let bundle = job.result.unwrap();
    assert_eq!(bundle.final_text, "translated");
    assert_eq!(bundle.degraded_steps, vec!["simplify"]);
    assert_eq!(harness.runner.call_count("simplify"), 2);
    assert_eq!(
        harness.runner.last_request("format").unwrap().input,
        "translated"
    );
    assert!(harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepDegraded { step_id, .. } if step_id == "simplify")));
}

#[tokio::test]
async fn test_retry_disabled_runs_once() {
    let yaml = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - { id: translate, name: Translate, order: 2, retry_on_failure: false, max_retries: 5, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new().fail("translate", transient());
    let harness = Harness::new(yaml, runner);

    let job = harness.run("note").await;

    assert_completed(&job);
    assert_eq!(harness.runner.call_count("translate"), 1);
}

/// Missing required variables fail the step before the runner is called
#[tokio::test]
async fn test_missing_required_variable_fails_without_calling_runner() {
    let yaml = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - id: personalize
    name: Personalize
    order: 2
    mandatory: true
    required_context_variables: ["patient_age"]
    task_template: "Explain for a {{ patient_age }} year old: {{ text }}"
"#;
    let harness = Harness::new(yaml, MockTaskRunner::new());

    let job = harness.run("note").await;

    assert_failed(&job, "patient_age");
    assert_eq!(harness.runner.call_count("personalize"), 0);
}
