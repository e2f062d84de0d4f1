//! Test: Branching on the detected document class

use crate::helpers::*;
use medpipe::execution::ExecutionEvent;

const CLASS_A_CATALOG: &str = r#"
classes:
  - { id: a, key: CLASS_A, display_name: Class A }
  - { id: b, key: CLASS_B, display_name: Class B }
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - { id: translate_a, name: Translate A, order: 2, document_class_id: a, task_template: "{{ text }}" }
  - { id: translate_b, name: Translate B, order: 2, document_class_id: b, task_template: "{{ text }}" }
"#;

/// An unrecognized class token falls back to the configured default class
#[tokio::test]
async fn test_unrecognized_token_uses_default_class() {
    let runner = MockTaskRunner::new()
        .respond("classify", "PRESCRIPTION")
        .respond("translate_a", "translated under A");
    let mut config = test_engine_config();
    config.default_class_key = "CLASS_A".to_string();
    let harness = Harness::with_config(CLASS_A_CATALOG, runner, config);

    let job = harness.run("Ibuprofen 400mg").await;

    assert_completed(&job);
    assert_eq!(job.detected_document_class.as_deref(), Some("CLASS_A"));
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec!["classify", "translate_a"]
    );
    assert_eq!(job.result.unwrap().final_text, "translated under A");

    let detected = harness.events().into_iter().find_map(|e| match e {
        ExecutionEvent::ClassDetected {
            class_key,
            fallback,
            ..
        } => Some((class_key, fallback)),
        _ => None,
    });
    assert_eq!(detected, Some((Some("CLASS_A".to_string()), true)));
}

/// Class-scoped steps of other classes never run
#[tokio::test]
async fn test_lab_report_path() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "The document is a LAB_REPORT.");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl, reference range 12-16").await;

    assert_completed(&job);
    assert_eq!(job.detected_document_class.as_deref(), Some("LAB_REPORT"));
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec![
            "validate",
            "classify",
            "translate",
            "lab_explain",
            "fact_check",
            "grammar_check",
            "format"
        ]
    );
    assert_eq!(harness.runner.call_count("discharge_summary"), 0);
}

#[tokio::test]
async fn test_multi_word_token_matches_key() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "discharge letter");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Patient was released on day 4").await;

    assert_completed(&job);
    assert_eq!(
        job.detected_document_class.as_deref(),
        Some("DISCHARGE_LETTER")
    );
    assert_eq!(harness.runner.call_count("discharge_summary"), 1);
    assert_eq!(harness.runner.call_count("lab_explain"), 0);
}

/// Structured branching output is read from the configured field
#[tokio::test]
async fn test_branching_field_reads_json() {
    let yaml = r#"
classes:
  - { id: a, key: CLASS_A, display_name: Class A }
  - { id: b, key: CLASS_B, display_name: Class B }
steps:
  - id: classify
    name: Classify
    order: 1
    is_branching_step: true
    branching_field: document_type
    task_template: "{{ text }}"
  - { id: translate_a, name: Translate A, order: 2, document_class_id: a, task_template: "{{ text }}" }
  - { id: translate_b, name: Translate B, order: 2, document_class_id: b, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new().respond(
        "classify",
        r#"{"reasoning": "mentions CLASS_A once", "document_type": "class_b"}"#,
    );
    let harness = Harness::new(yaml, runner);

    let job = harness.run("some text").await;

    assert_completed(&job);
    assert_eq!(job.detected_document_class.as_deref(), Some("CLASS_B"));
    assert_eq!(harness.runner.call_count("translate_b"), 1);
    assert_eq!(harness.runner.call_count("translate_a"), 0);
}

/// Disabled classes are never matched
#[tokio::test]
async fn test_disabled_class_falls_back_to_default() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT");
    let harness = Harness::new(MEDICAL_CATALOG, runner);
    harness.classes.set_class_enabled("lab", false).await.unwrap();

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    assert_eq!(job.detected_document_class.as_deref(), Some("GENERAL"));
    assert_eq!(harness.runner.call_count("lab_explain"), 0);
}

/// With no usable default class the job continues with universal steps only
#[tokio::test]
async fn test_missing_default_class_runs_universal_steps() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "UNKNOWN");
    let mut config = test_engine_config();
    config.default_class_key = "NOT_CONFIGURED".to_string();
    let harness = Harness::with_config(MEDICAL_CATALOG, runner, config);

    let job = harness.run("Patient note").await;

    assert_completed(&job);
    assert!(job.detected_document_class.is_none());
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec![
            "validate",
            "classify",
            "translate",
            "fact_check",
            "grammar_check",
            "format"
        ]
    );
}

/// Without a branching step the default class applies when it is allowed
#[tokio::test]
async fn test_no_branching_step_when_not_required() {
    let yaml = r#"
classes:
  - { id: general, key: GENERAL, display_name: General, is_system: true }
steps:
  - { id: simplify, name: Simplify, order: 1, task_template: "{{ text }}" }
  - { id: general_notes, name: General notes, order: 2, document_class_id: general, task_template: "{{ text }}" }
"#;
    let mut config = test_engine_config();
    config.require_branching_step = false;
    let harness = Harness::with_config(yaml, MockTaskRunner::new(), config);

    let job = harness.run("note").await;

    assert_completed(&job);
    assert_eq!(job.detected_document_class.as_deref(), Some("GENERAL"));
    assert_eq!(
        harness.executed_steps(job.job_id).await,
        vec!["simplify", "general_notes"]
    );
}

#[tokio::test]
async fn test_missing_branching_step_is_configuration_error() {
    let yaml = r#"
steps:
  - { id: simplify, name: Simplify, order: 1, task_template: "{{ text }}" }
"#;
    let harness = Harness::new(yaml, MockTaskRunner::new());

    let job = harness.run("note").await;

    assert_failed(&job, "configuration error");
    assert!(job.started_at.is_none());
    assert!(harness.runner.calls().is_empty());
}
