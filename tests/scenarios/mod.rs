//! Scenario-based tests for medpipe

mod classification;
mod concurrency_groups;
mod result_bundle;
mod retry_behavior;
mod stop_conditions;
