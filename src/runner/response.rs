//! Task runner result types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for task runner calls
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskRunnerError {
    /// Retriable: connection errors, upstream throttling, temporary failures
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retriable: the attempt ran past its deadline
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    /// Not retriable: bad template, malformed input, misconfiguration
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// The call was abandoned by a hard cancel
    #[error("aborted by cancellation")]
    Aborted,
}

impl TaskRunnerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskRunnerError::Transient(_) | TaskRunnerError::Timeout(_))
    }
}

/// Output of one task runner call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub output: String,

    /// Confidence in [0, 1] if the runner reported one
    #[serde(default)]
    pub confidence: Option<f64>,

    /// Runner-specific details (model, token usage, ...)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TaskOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            confidence: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reported confidence clamped into [0, 1]; NaN counts as not reported
    pub fn reported_confidence(&self) -> Option<f64> {
        self.confidence
            .filter(|c| !c.is_nan())
            .map(|c| c.clamp(0.0, 1.0))
    }
}
