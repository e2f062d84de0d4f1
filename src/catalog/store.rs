//! Configuration store for step definitions and document classes

use crate::core::config::CatalogConfig;
use crate::core::document_class::DocumentClass;
use crate::core::step::PipelineStepDefinition;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Durable source of catalog configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_steps(&self) -> Result<Vec<PipelineStepDefinition>>;

    async fn get_step(&self, step_id: &str) -> Result<Option<PipelineStepDefinition>>;

    async fn upsert_step(&self, step: &PipelineStepDefinition) -> Result<()>;

    /// Returns whether a step was removed
    async fn delete_step(&self, step_id: &str) -> Result<bool>;

    async fn list_classes(&self) -> Result<Vec<DocumentClass>>;

    async fn get_class(&self, class_id: &str) -> Result<Option<DocumentClass>>;

    async fn upsert_class(&self, class: &DocumentClass) -> Result<()>;

    /// Returns whether a class was removed
    async fn delete_class(&self, class_id: &str) -> Result<bool>;
}

/// In-memory config store (for tests and the CLI harness)
#[derive(Default)]
pub struct InMemoryConfigStore {
    steps: RwLock<BTreeMap<String, PipelineStepDefinition>>,
    classes: RwLock<BTreeMap<String, DocumentClass>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from a validated catalog file
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            steps: RwLock::new(
                config
                    .steps
                    .iter()
                    .map(|s| (s.id.clone(), s.clone()))
                    .collect(),
            ),
            classes: RwLock::new(
                config
                    .classes
                    .iter()
                    .map(|c| (c.id.clone(), c.clone()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_steps(&self) -> Result<Vec<PipelineStepDefinition>> {
        Ok(self.steps.read().await.values().cloned().collect())
    }

    async fn get_step(&self, step_id: &str) -> Result<Option<PipelineStepDefinition>> {
        Ok(self.steps.read().await.get(step_id).cloned())
    }

    async fn upsert_step(&self, step: &PipelineStepDefinition) -> Result<()> {
        self.steps
            .write()
            .await
            .insert(step.id.clone(), step.clone());
        Ok(())
    }

    async fn delete_step(&self, step_id: &str) -> Result<bool> {
        Ok(self.steps.write().await.remove(step_id).is_some())
    }

    async fn list_classes(&self) -> Result<Vec<DocumentClass>> {
        Ok(self.classes.read().await.values().cloned().collect())
    }

    async fn get_class(&self, class_id: &str) -> Result<Option<DocumentClass>> {
        Ok(self.classes.read().await.get(class_id).cloned())
    }

    async fn upsert_class(&self, class: &DocumentClass) -> Result<()> {
        self.classes
            .write()
            .await
            .insert(class.id.clone(), class.clone());
        Ok(())
    }

    async fn delete_class(&self, class_id: &str) -> Result<bool> {
        Ok(self.classes.write().await.remove(class_id).is_some())
    }
}
