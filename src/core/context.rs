//! Job context - variables and step outputs shared across one run

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Execution context for a single job
///
/// Holds caller-supplied variables, outputs of steps already run, and the
/// classification decided by the branching step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: Uuid,

    /// Caller-supplied variables
    pub variables: HashMap<String, String>,

    /// Outputs from completed steps (step_id -> output)
    pub step_outputs: HashMap<String, String>,

    /// Class key recorded after the branching step
    pub detected_class: Option<String>,

    pub target_language: Option<String>,

    /// The step currently executing (if any)
    pub current_step_id: Option<String>,
}

impl JobContext {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
            detected_class: None,
            target_language: None,
            current_step_id: None,
        }
    }

    pub fn with_target_language(mut self, language: Option<String>) -> Self {
        self.target_language = language;
        self
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    pub fn set_step_output(&mut self, step_id: &str, output: impl Into<String>) {
        self.step_outputs.insert(step_id.to_string(), output.into());
    }

    pub fn get_step_output(&self, step_id: &str) -> Option<&String> {
        self.step_outputs.get(step_id)
    }

    /// All variables available to a step's template, given the step's input text
    pub fn get_rendering_variables(&self, input: &str) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        for (step_id, output) in &self.step_outputs {
            vars.insert(format!("steps.{}.output", step_id), output.clone());
        }

        vars.insert("text".to_string(), input.to_string());
        vars.insert("job_id".to_string(), self.job_id.to_string());

        if let Some(ref class) = self.detected_class {
            vars.insert("document_class".to_string(), class.clone());
        }
        if let Some(ref language) = self.target_language {
            vars.insert("target_language".to_string(), language.clone());
        }
        if let Some(ref current_step) = self.current_step_id {
            vars.insert("current_step".to_string(), current_step.clone());
        }

        vars
    }
}
