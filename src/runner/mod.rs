//! Task runners and text extraction
//!
//! The engine never talks to a model or an OCR service directly. Each step's
//! unit of work goes through a [`TaskRunner`], and the raw document goes
//! through a [`TextExtractor`](extract::TextExtractor).

pub mod client;
pub mod extract;
pub mod response;
pub mod subprocess;

use crate::core::step::render_template;
use async_trait::async_trait;
use std::collections::HashMap;

pub use client::RunnerConfig;
pub use extract::{ExtractedText, ExtractionError, PlainTextExtractor, TextExtractor};
pub use response::{TaskOutput, TaskRunnerError};
pub use subprocess::SubprocessTaskRunner;

/// Everything a runner needs to perform one step attempt
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub step_id: String,
    pub step_name: String,
    /// Opaque template, rendered against `variables`
    pub task_template: String,
    pub model_reference: Option<String>,
    /// Working text handed to the step
    pub input: String,
    pub variables: HashMap<String, String>,
}

impl TaskRequest {
    /// The template with variables substituted
    pub fn rendered(&self) -> String {
        render_template(&self.task_template, &self.variables)
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run one attempt of a step
    async fn run(&self, request: &TaskRequest) -> Result<TaskOutput, TaskRunnerError>;
}
