//! Test: Stop conditions halt the pipeline without running later steps

use crate::helpers::*;
use medpipe::execution::{ExecutionEvent, JobOutcome};
use medpipe::runner::TaskOutput;

const SHORT_CATALOG: &str = r#"
classes:
  - { id: a, key: CLASS_A, display_name: Class A }
steps:
  - id: validate
    name: Validate
    order: 1
    output_mode: inspect
    task_template: "Validate: {{ text }}"
    stop_conditions:
      trigger_values: ["FAIL"]
      reason: validation_failed
  - { id: classify, name: Classify, order: 2, is_branching_step: true, task_template: "{{ text }}" }
  - { id: translate, name: Translate, order: 3, document_class_id: a, task_template: "{{ text }}" }
"#;

/// Validate → "FAIL" halts before Classify and Translate are ever executed
#[tokio::test]
async fn test_validation_failure_halts_before_classification() {
    let runner = MockTaskRunner::new()
        .respond("validate", "FAIL")
        .respond("classify", "CLASS_A");
    let harness = Harness::new(SHORT_CATALOG, runner);

    let job = harness.run("Holiday photo of a beach").await;

    assert_halted(&job, "validation_failed");
    assert!(job.result.is_none());
    assert_eq!(harness.executed_steps(job.job_id).await, vec!["validate"]);
    assert_eq!(harness.runner.calls(), vec!["validate"]);

    match harness.service.get_result(job.job_id).await.unwrap() {
        JobOutcome::Halted(signal) => {
            assert_eq!(signal.step_id, "validate");
            assert_eq!(signal.matched_value, "FAIL");
            assert!(!signal.user_message.is_empty());
        }
        other => panic!("expected a halted outcome, got {:?}", other),
    }

    assert!(harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::JobHalted { step_id, .. } if step_id == "validate")));
}

/// Matching ignores case and extra whitespace
#[tokio::test]
async fn test_trigger_match_is_normalized() {
    let runner = MockTaskRunner::new().respond("validate", "Result:\n   fail  ");
    let harness = Harness::new(SHORT_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;
    assert_halted(&job, "validation_failed");
}

#[tokio::test]
async fn test_passing_validation_continues() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "CLASS_A")
        .respond("translate", "Your blood values are normal.");
    let harness = Harness::new(SHORT_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;
    assert_completed(&job);
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec!["validate", "classify", "translate"]
    );
    assert_eq!(
        job.result.unwrap().final_text,
        "Your blood values are normal."
    );
}

/// A class-scoped step can halt the job during processing
#[tokio::test]
async fn test_class_step_halts_processing() {
    let yaml = r#"
classes:
  - { id: lab, key: LAB_REPORT, display_name: Lab report }
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - id: critical_check
    name: Critical value check
    order: 2
    document_class_id: lab
    output_mode: inspect
    task_template: "{{ text }}"
    stop_conditions:
      trigger_values: ["critical value"]
      reason: critical_lab_value
      user_message: "Please contact your doctor right away."
  - { id: simplify, name: Simplify, order: 3, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new()
        .respond("classify", "LAB_REPORT")
        .respond("critical_check", "CRITICAL   VALUE: potassium 7.1");
    let harness = Harness::new(yaml, runner);

    let job = harness.run("K 7.1 mmol/l").await;

    assert_halted(&job, "critical_lab_value");
    assert_eq!(job.detected_document_class.as_deref(), Some("LAB_REPORT"));
    assert_eq!(
        job.halt.as_ref().unwrap().user_message,
        "Please contact your doctor right away."
    );
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec!["classify", "critical_check"]
    );
    assert_eq!(harness.runner.call_count("simplify"), 0);
}

/// A trigger inside a concurrency group halts after the group is joined;
/// siblings already ran but nothing after the group does
#[tokio::test]
async fn test_trigger_inside_group_stops_after_group() {
    let yaml = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - id: safety_check
    name: Safety check
    order: 2
    concurrency_group: checks
    output_mode: inspect
    task_template: "{{ text }}"
    stop_conditions: { trigger_values: ["UNSAFE"], reason: unsafe_content }
  - { id: style_check, name: Style check, order: 3, concurrency_group: checks, task_template: "{{ text }}" }
  - { id: format, name: Format, order: 4, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new()
        .respond("safety_check", "UNSAFE")
        .sequence("style_check", vec![Ok(TaskOutput::new("styled"))]);
    let mut config = test_engine_config();
    config.require_branching_step = true;
    let harness = Harness::with_config(yaml, runner, config);

    let job = harness.run("some text").await;

    assert_halted(&job, "unsafe_content");
    let executed = harness.executed_steps(job.job_id).await;
    assert!(executed.contains(&"safety_check".to_string()));
    assert!(executed.contains(&"style_check".to_string()));
    assert!(!executed.contains(&"format".to_string()));
}

/// A halt on the branching step still records the detected class
#[tokio::test]
async fn test_branching_step_halt_records_class() {
    let yaml = r#"
classes:
  - { id: a, key: CLASS_A, display_name: Class A }
steps:
  - id: classify
    name: Classify
    order: 1
    is_branching_step: true
    task_template: "{{ text }}"
    stop_conditions:
      trigger_values: ["UNREADABLE"]
      reason: unreadable_scan
  - { id: translate, name: Translate, order: 2, document_class_id: a, task_template: "{{ text }}" }
  - { id: format, name: Format, order: 3, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new().respond("classify", "CLASS_A - UNREADABLE");
    let harness = Harness::new(yaml, runner);

    let job = harness.run("blurred scan").await;

    assert_halted(&job, "unreadable_scan");
    assert_eq!(job.detected_document_class.as_deref(), Some("CLASS_A"));
    assert_eq!(harness.executed_steps(job.job_id).await, vec!["classify"]);
    assert_eq!(harness.runner.calls(), vec!["classify"]);

    let stored = harness.service.get_status(job.job_id).await.unwrap();
    assert_eq!(stored.status, medpipe::core::state::JobStatus::Halted);
}
