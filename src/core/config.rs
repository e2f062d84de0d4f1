//! Engine and catalog configuration from YAML

use crate::core::document_class::{is_valid_key, DocumentClass};
use crate::core::step::{check_scope_invariants, PipelineStepDefinition};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// How the resolved plan is grouped into batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingStrategy {
    /// Every step runs alone, concurrency groups are ignored
    Sequential,
    /// Adjacent members of a concurrency group run together
    #[default]
    Grouped,
}

/// Backoff between attempts of a transiently failing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// `min(base * multiplier^(attempt-1), max)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard wall-clock ceiling per job
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Class used when the branching output matches no enabled class
    #[serde(default = "default_class_key")]
    pub default_class_key: String,

    /// Refuse to start jobs when the catalog has no enabled branching step
    #[serde(default = "default_true")]
    pub require_branching_step: bool,

    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,

    #[serde(default)]
    pub scheduling: SchedulingStrategy,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_job_timeout_secs() -> u64 {
    900
}

fn default_class_key() -> String {
    "GENERAL".to_string()
}

fn default_true() -> bool {
    true
}

fn default_catalog_ttl_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
            default_class_key: default_class_key(),
            require_branching_step: true,
            catalog_ttl_secs: default_catalog_ttl_secs(),
            scheduling: SchedulingStrategy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_timeout_secs == 0 {
            anyhow::bail!("job_timeout_secs must be greater than zero");
        }
        if !is_valid_key(&self.default_class_key) {
            anyhow::bail!(
                "default_class_key '{}' is not a valid class key",
                self.default_class_key
            );
        }
        if self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!("retry.backoff_multiplier must be at least 1.0");
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }
}

/// Seed catalog: document classes and step definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub classes: Vec<DocumentClass>,

    #[serde(default)]
    pub steps: Vec<PipelineStepDefinition>,
}

impl CatalogConfig {
    /// Load a catalog from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a catalog from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CatalogConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut class_ids = HashSet::new();
        let mut class_keys = HashSet::new();
        for class in &self.classes {
            if !class_ids.insert(class.id.as_str()) {
                anyhow::bail!("Duplicate class ID: {}", class.id);
            }
            if !is_valid_key(&class.key) {
                anyhow::bail!("Class '{}' has invalid key '{}'", class.id, class.key);
            }
            if !class_keys.insert(class.key.as_str()) {
                anyhow::bail!("Duplicate class key: {}", class.key);
            }
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
            if step.task_template.trim().is_empty() && !step.is_branching_step {
                anyhow::bail!("Step '{}' has an empty task_template", step.id);
            }
            if let Some(ref class_id) = step.document_class_id {
                if !class_ids.contains(class_id.as_str()) {
                    anyhow::bail!(
                        "Step '{}' references non-existent class '{}'",
                        step.id,
                        class_id
                    );
                }
            }
        }

        check_scope_invariants(&self.steps)?;
        Ok(())
    }
}
