//! Test: Concurrency groups fan out on the same input and merge by precedence

use crate::helpers::*;
use medpipe::core::config::SchedulingStrategy;
use medpipe::runner::TaskRunnerError;
use std::time::{Duration, Instant};

fn lab_runner() -> MockTaskRunner {
    MockTaskRunner::new()
        .respond("validate", "MEDICAL")
        .respond("classify", "LAB_REPORT")
        .respond("lab_explain", "explained")
        .respond("fact_check", "facts fixed")
        .respond("grammar_check", "grammar fixed")
}

#[tokio::test]
async fn test_higher_precedence_wins_when_both_succeed() {
    let harness = Harness::new(MEDICAL_CATALOG, lab_runner());

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    assert_eq!(job.result.unwrap().final_text, "grammar fixed");

    // both members saw the same input
    let fact = harness.runner.last_request("fact_check").unwrap();
    let grammar = harness.runner.last_request("grammar_check").unwrap();
    assert_eq!(fact.input, "explained");
    assert_eq!(grammar.input, "explained");
}

#[tokio::test]
async fn test_surviving_member_wins_when_other_fails() {
    let runner = lab_runner().fail("grammar_check", TaskRunnerError::Fatal("bad output".into()));
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    let bundle = job.result.unwrap();
    assert_eq!(bundle.final_text, "facts fixed");
    assert_eq!(bundle.degraded_steps, vec!["grammar_check"]);
}

#[tokio::test]
async fn test_input_passes_through_when_all_members_fail() {
    let runner = lab_runner()
        .fail("fact_check", TaskRunnerError::Fatal("down".into()))
        .fail("grammar_check", TaskRunnerError::Fatal("down".into()));
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    let bundle = job.result.unwrap();
    assert_eq!(bundle.final_text, "explained");
    assert_eq!(bundle.degraded_steps, vec!["fact_check", "grammar_check"]);
}

#[tokio::test]
async fn test_group_members_run_concurrently() {
    let runner = lab_runner()
        .delay("fact_check", Duration::from_millis(400))
        .delay("grammar_check", Duration::from_millis(400));
    let harness = Harness::new(MEDICAL_CATALOG, runner);

    let started = Instant::now();
    let job = harness.run("Hb 13.2 g/dl").await;
    let elapsed = started.elapsed();

    assert_completed(&job);
    assert!(
        elapsed < Duration::from_millis(750),
        "group took {:?}, members did not overlap",
        elapsed
    );
}

/// A mandatory member failing fails the whole job
#[tokio::test]
async fn test_mandatory_member_failure_fails_job() {
    let yaml = r#"
steps:
  - { id: classify, name: Classify, order: 1, is_branching_step: true, task_template: "{{ text }}" }
  - { id: fact_check, name: Fact check, order: 2, concurrency_group: checks, mandatory: true, task_template: "{{ text }}" }
  - { id: grammar_check, name: Grammar check, order: 3, concurrency_group: checks, task_template: "{{ text }}" }
  - { id: format, name: Format, order: 4, task_template: "{{ text }}" }
"#;
    let runner = MockTaskRunner::new().fail("fact_check", TaskRunnerError::Fatal("no model".into()));
    let harness = Harness::new(yaml, runner);

    let job = harness.run("note").await;

    assert_failed(&job, "Fact check");
    assert_eq!(harness.runner.call_count("grammar_check"), 1);
    assert_eq!(harness.runner.call_count("format"), 0);
}

/// Sequential scheduling chains group members instead of fanning out
#[tokio::test]
async fn test_sequential_strategy_chains_members() {
    let mut config = test_engine_config();
    config.scheduling = SchedulingStrategy::Sequential;
    let harness = Harness::with_config(MEDICAL_CATALOG, lab_runner(), config);

    let job = harness.run("Hb 13.2 g/dl").await;

    assert_completed(&job);
    assert_eq!(job.result.unwrap().final_text, "grammar fixed");
    assert_eq!(
        harness.runner.last_request("grammar_check").unwrap().input,
        "facts fixed"
    );
}
