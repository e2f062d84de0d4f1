//! Stop condition evaluation

use crate::core::step::PipelineStepDefinition;
use serde::{Deserialize, Serialize};

const DEFAULT_REASON: &str = "Stop condition triggered";
const DEFAULT_USER_MESSAGE: &str = "Processing stopped early because the document did not pass a pipeline check.";

/// Signal raised when a step's output matches one of its stop triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSignal {
    pub step_id: String,
    pub step_name: String,
    /// The configured trigger value that matched
    pub matched_value: String,
    pub reason: String,
    pub user_message: String,
}

/// A normalized trigger fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPattern {
    original: String,
    needle: String,
}

impl TriggerPattern {
    pub fn new(value: &str) -> Self {
        Self {
            original: value.to_string(),
            needle: normalize(value),
        }
    }

    /// Case/whitespace-insensitive containment. Empty triggers never match.
    pub fn matches(&self, normalized_haystack: &str) -> bool {
        !self.needle.is_empty() && normalized_haystack.contains(&self.needle)
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}

/// Lowercase, trim and collapse internal whitespace runs to a single space
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Decides whether a step's output halts the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct StopConditionEvaluator;

impl StopConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, step: &PipelineStepDefinition, output: &str) -> Option<StopSignal> {
        let conditions = step.stop_conditions.as_ref()?;
        if conditions.is_empty() {
            return None;
        }

        let haystack = normalize(output);
        let matched = conditions
            .trigger_values
            .iter()
            .map(|value| TriggerPattern::new(value))
            .find(|pattern| pattern.matches(&haystack))?;

        Some(StopSignal {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            matched_value: matched.original().to_string(),
            reason: conditions
                .reason
                .clone()
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
            user_message: conditions
                .user_message
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_MESSAGE.to_string()),
        })
    }
}
