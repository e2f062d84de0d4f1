//! Test: Result bundle contents, progress reporting and content purge

use crate::helpers::*;
use medpipe::core::state::{EngineStage, JobStatus};
use medpipe::execution::{ExecutionEvent, JobOptions, JobOutcome, ServiceError};

const CONFIDENCE_CATALOG: &str = r#"
classes:
  - { id: general, key: GENERAL, display_name: General, is_system: true }
steps:
  - { id: check, name: Check, order: 1, output_mode: inspect, task_template: "{{ text }}" }
  - { id: classify, name: Classify, order: 2, is_branching_step: true, task_template: "{{ text }}" }
  - { id: simplify, name: Simplify, order: 3, task_template: "{{ text }}" }
"#;

/// Confidences [0.9, 0.7, none] aggregate to 0.8
#[tokio::test]
async fn test_aggregate_confidence_ignores_unreported_steps() {
    let runner = MockTaskRunner::new()
        .respond_with_confidence("check", "ok", 0.9)
        .respond("classify", "GENERAL")
        .respond_with_confidence("simplify", "simple", 0.7);
    let harness = Harness::new(CONFIDENCE_CATALOG, runner);

    let job = harness.run("note").await;

    assert_completed(&job);
    let bundle = job.result.unwrap();
    assert!((bundle.aggregate_confidence - 0.8).abs() < 1e-9);
    assert_eq!(bundle.steps_executed, 3);

    // the unreported step is recorded with full confidence
    let rows = harness.rows(job.job_id).await;
    let classify = rows.iter().find(|r| r.step_id == "classify").unwrap();
    assert_eq!(classify.confidence, Some(1.0));
}

#[tokio::test]
async fn test_no_reported_confidence_aggregates_to_one() {
    let harness = Harness::new(CONFIDENCE_CATALOG, MockTaskRunner::new());

    let job = harness.run("note").await;

    assert_completed(&job);
    assert_eq!(job.result.unwrap().aggregate_confidence, 1.0);
}

#[tokio::test]
async fn test_secondary_translation_with_target_language() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT")
        .respond("format", "Your blood count is normal.")
        .respond("secondary_translation", "Kan sayımınız normal.");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness
        .run_with("Hb 13.2 g/dl", JobOptions::default().with_target_language("tr"))
        .await;

    assert_completed(&job);
    let bundle = job.result.unwrap();
    assert_eq!(bundle.final_text, "Your blood count is normal.");
    assert_eq!(
        bundle.secondary_translation.as_deref(),
        Some("Kan sayımınız normal.")
    );
    assert_eq!(bundle.target_language.as_deref(), Some("tr"));

    let request = harness.runner.last_request("secondary_translation").unwrap();
    assert_eq!(request.input, "Your blood count is normal.");
    assert_eq!(request.rendered(), "Translate into tr: Your blood count is normal.");
}

#[tokio::test]
async fn test_no_secondary_translation_without_target_language() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    assert!(job.result.unwrap().secondary_translation.is_none());
    assert_eq!(harness.runner.call_count("secondary_translation"), 0);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_finishes_at_100() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;
    assert_completed(&job);

    let progress: Vec<u8> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageEntered { progress, .. }
            | ExecutionEvent::StepCompleted { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    let stages: Vec<EngineStage> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageEntered { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            EngineStage::Extracting,
            EngineStage::Validating,
            EngineStage::Classifying,
            EngineStage::Processing,
            EngineStage::Finalizing
        ]
    );

    let status = harness.service.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.stage, EngineStage::Completed);
    assert_eq!(status.progress_percent, 100);
}

#[tokio::test]
async fn test_purge_removes_content_but_keeps_status() {
    let runner = MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT");
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;
    assert!(matches!(
        harness.service.get_result(job.job_id).await,
        Ok(JobOutcome::Completed(_))
    ));

    harness.service.purge_content(job.job_id).await.unwrap();

    let status = harness.service.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(matches!(
        harness.service.get_result(job.job_id).await,
        Err(ServiceError::ResultPurged)
    ));
    let rows = harness.rows(job.job_id).await;
    assert!(!rows.is_empty());
    assert!(rows
        .iter()
        .all(|r| r.input_text.is_none() && r.output_text.is_none()));
}

#[tokio::test]
async fn test_variables_reach_templates() {
    let yaml = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - id: personalize
    name: Personalize
    order: 2
    required_context_variables: ["audience"]
    task_template: "For {{ audience }}: {{ text }} (after {{ steps.classify.output }})"
"#;
    let runner = MockTaskRunner::new().respond("classify", "UNKNOWN");
    let harness = Harness::new(yaml, runner);

    let mut options = JobOptions::default();
    options
        .variables
        .insert("audience".to_string(), "a patient".to_string());
    let job = harness.run_with("Hb low", options).await;

    assert_completed(&job);
    let request = harness.runner.last_request("personalize").unwrap();
    assert_eq!(request.rendered(), "For a patient: Hb low (after UNKNOWN)");
}
