//! Step definition domain model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// How a step's output is folded back into the running job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Output replaces the working text
    #[default]
    Transform,
    /// Output is only inspected (stop conditions, branching); text passes through
    Inspect,
    /// Output becomes the secondary-language translation of the bundle
    SecondaryTranslation,
}

/// Early-termination configuration for a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopConditions {
    /// Output fragments that halt the pipeline when found
    #[serde(default)]
    pub trigger_values: Vec<String>,

    /// Internal reason recorded on the job
    #[serde(default)]
    pub reason: Option<String>,

    /// Message shown to the end user
    #[serde(default)]
    pub user_message: Option<String>,
}

impl StopConditions {
    pub fn on(values: &[&str]) -> Self {
        Self {
            trigger_values: values.iter().map(|v| v.to_string()).collect(),
            reason: None,
            user_message: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trigger_values.iter().all(|v| v.trim().is_empty())
    }
}

/// Scope a step belongs to: every document, or a single document class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepScope {
    Universal,
    Class(String),
}

impl fmt::Display for StepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepScope::Universal => write!(f, "universal"),
            StepScope::Class(id) => write!(f, "class '{}'", id),
        }
    }
}

/// A single configurable step of the translation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStepDefinition {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Position within the step's scope
    pub order: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Class this step is scoped to (None = universal)
    #[serde(default)]
    pub document_class_id: Option<String>,

    /// Whether this step's output decides the document class
    #[serde(default)]
    pub is_branching_step: bool,

    /// JSON field holding the class token when the branching output is structured
    #[serde(default)]
    pub branching_field: Option<String>,

    /// Universal step that must run after classification
    #[serde(default)]
    pub post_branching: bool,

    /// Opaque template handed to the task runner
    pub task_template: String,

    #[serde(default)]
    pub model_reference: Option<String>,

    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub stop_conditions: Option<StopConditions>,

    /// Variables that must be present in the job context before running
    #[serde(default)]
    pub required_context_variables: Vec<String>,

    /// Failure after retries fails the whole job instead of passing input through
    #[serde(default)]
    pub mandatory: bool,

    /// Steps sharing a group id and adjacent in the plan run concurrently
    #[serde(default)]
    pub concurrency_group: Option<String>,

    /// Higher precedence wins when several group members transform the same text
    #[serde(default)]
    pub merge_precedence: i32,

    #[serde(default)]
    pub output_mode: OutputMode,

    /// Per-attempt timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl PipelineStepDefinition {
    /// Create an enabled universal transform step with default retry settings
    pub fn new(id: impl Into<String>, order: i32, task_template: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            order,
            enabled: true,
            document_class_id: None,
            is_branching_step: false,
            branching_field: None,
            post_branching: false,
            task_template: task_template.into(),
            model_reference: None,
            retry_on_failure: true,
            max_retries: default_max_retries(),
            stop_conditions: None,
            required_context_variables: Vec::new(),
            mandatory: false,
            concurrency_group: None,
            merge_precedence: 0,
            output_mode: OutputMode::Transform,
            timeout_secs: None,
        }
    }

    pub fn for_class(mut self, class_id: impl Into<String>) -> Self {
        self.document_class_id = Some(class_id.into());
        self
    }

    pub fn branching(mut self) -> Self {
        self.is_branching_step = true;
        self
    }

    pub fn after_branching(mut self) -> Self {
        self.post_branching = true;
        self
    }

    pub fn with_stop_conditions(mut self, conditions: StopConditions) -> Self {
        self.stop_conditions = Some(conditions);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>, precedence: i32) -> Self {
        self.concurrency_group = Some(group.into());
        self.merge_precedence = precedence;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn scope(&self) -> StepScope {
        match &self.document_class_id {
            Some(id) => StepScope::Class(id.clone()),
            None => StepScope::Universal,
        }
    }

    pub fn is_universal(&self) -> bool {
        self.document_class_id.is_none()
    }

    /// Output mode after applying the branching override
    pub fn effective_output_mode(&self) -> OutputMode {
        if self.is_branching_step {
            OutputMode::Inspect
        } else {
            self.output_mode
        }
    }

    /// Total attempts allowed for transient failures
    pub fn max_attempts(&self) -> u32 {
        if self.retry_on_failure {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Required variables absent from the given context
    pub fn missing_variables(&self, variables: &HashMap<String, String>) -> Vec<String> {
        self.required_context_variables
            .iter()
            .filter(|name| !variables.contains_key(name.as_str()))
            .cloned()
            .collect()
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Render a task template, replacing `{{ name }}` placeholders with known variables.
/// Unknown placeholders are left untouched.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Names of all placeholders referenced by a template, in first-seen order
pub fn template_variables(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Violation of the per-scope ordering/branching invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeViolation {
    #[error("steps '{first}' and '{second}' share order {order} in {scope} scope")]
    DuplicateOrder {
        scope: String,
        order: i32,
        first: String,
        second: String,
    },

    #[error("{scope} scope has more than one enabled branching step ('{first}', '{second}')")]
    MultipleBranchingSteps {
        scope: String,
        first: String,
        second: String,
    },
}

/// Check that `order` is unique per scope and at most one enabled branching step exists per scope
pub fn check_scope_invariants(steps: &[PipelineStepDefinition]) -> Result<(), ScopeViolation> {
    let mut orders: HashMap<(StepScope, i32), &str> = HashMap::new();
    let mut branching: HashMap<StepScope, &str> = HashMap::new();

    for step in steps {
        let scope = step.scope();
        if let Some(first) = orders.insert((scope.clone(), step.order), step.id.as_str()) {
            return Err(ScopeViolation::DuplicateOrder {
                scope: scope.to_string(),
                order: step.order,
                first: first.to_string(),
                second: step.id.clone(),
            });
        }

        if step.enabled && step.is_branching_step {
            if let Some(first) = branching.insert(scope.clone(), step.id.as_str()) {
                return Err(ScopeViolation::MultipleBranchingSteps {
                    scope: scope.to_string(),
                    first: first.to_string(),
                    second: step.id.clone(),
                });
            }
        }
    }

    Ok(())
}
