//! Cached step catalog
//!
//! Reads are served from one cached [`CatalogSnapshot`] so every ordered view
//! comes from the same step set. Mutations go to the [`ConfigStore`] and then
//! drop the whole cache namespace before returning.

use crate::catalog::cache::{get_json, put_json, CacheBackend, CacheError};
use crate::catalog::store::ConfigStore;
use crate::core::plan::CatalogSnapshot;
use crate::core::step::{check_scope_invariants, PipelineStepDefinition, ScopeViolation};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Cache namespace owned by the step catalog
pub const STEP_CATALOG_NAMESPACE: &str = "step_catalog";
const SNAPSHOT_KEY: &str = "enabled_steps";

/// Errors raised by catalog reads and administrative mutations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("configuration store error: {0}")]
    Store(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Invalid(#[from] ScopeViolation),

    #[error("step '{0}' not found")]
    StepNotFound(String),

    #[error("step '{0}' already exists")]
    DuplicateStep(String),

    #[error("step '{step}' references unknown class '{class_id}'")]
    UnknownClass { step: String, class_id: String },

    #[error("class '{0}' not found")]
    ClassNotFound(String),

    #[error("class '{0}' already exists")]
    DuplicateClass(String),

    #[error("invalid class key '{0}'")]
    InvalidKey(String),

    #[error("system class '{0}' cannot be {1}")]
    SystemClassProtected(String, &'static str),

    #[error("class '{class}' is still used by steps: {steps}")]
    ClassInUse { class: String, steps: String },
}

impl From<anyhow::Error> for CatalogError {
    fn from(err: anyhow::Error) -> Self {
        CatalogError::Store(format!("{:#}", err))
    }
}

/// TTL-cached registry of step definitions
pub struct StepCatalog {
    store: Arc<dyn ConfigStore>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
    /// Fills hold the read side across load and put; invalidation takes the write side
    fill_gate: RwLock<()>,
    admin_lock: Mutex<()>,
}

impl StepCatalog {
    pub fn new(store: Arc<dyn ConfigStore>, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            store,
            cache,
            ttl,
            fill_gate: RwLock::new(()),
            admin_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Ordered snapshot of all enabled steps
    pub async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        if let Some(snapshot) =
            get_json::<CatalogSnapshot>(self.cache.as_ref(), STEP_CATALOG_NAMESPACE, SNAPSHOT_KEY)
                .await?
        {
            return Ok(snapshot);
        }

        let _fill = self.fill_gate.read().await;
        let snapshot = CatalogSnapshot::new(self.store.list_steps().await?);
        debug!(steps = snapshot.len(), "Loaded step catalog from store");

        put_json(
            self.cache.as_ref(),
            STEP_CATALOG_NAMESPACE,
            SNAPSHOT_KEY,
            &snapshot,
            self.ttl,
        )
        .await?;
        Ok(snapshot)
    }

    pub async fn get_enabled_steps(&self) -> Result<Vec<PipelineStepDefinition>, CatalogError> {
        Ok(self.snapshot().await?.steps().to_vec())
    }

    pub async fn get_steps_for_class(
        &self,
        class_id: &str,
    ) -> Result<Vec<PipelineStepDefinition>, CatalogError> {
        Ok(self.snapshot().await?.steps_for_class(class_id))
    }

    pub async fn get_branching_step(
        &self,
    ) -> Result<Option<PipelineStepDefinition>, CatalogError> {
        Ok(self.snapshot().await?.branching_step().cloned())
    }

    /// Drop every cached catalog entry, waiting out any fill in progress
    pub async fn invalidate(&self) -> Result<(), CatalogError> {
        let _gate = self.fill_gate.write().await;
        self.cache.invalidate_namespace(STEP_CATALOG_NAMESPACE).await?;
        Ok(())
    }

    pub async fn create_step(&self, step: PipelineStepDefinition) -> Result<(), CatalogError> {
        let _guard = self.admin_lock.lock().await;
        if self.store.get_step(&step.id).await?.is_some() {
            return Err(CatalogError::DuplicateStep(step.id));
        }
        self.write_step(step).await
    }

    pub async fn update_step(&self, step: PipelineStepDefinition) -> Result<(), CatalogError> {
        let _guard = self.admin_lock.lock().await;
        if self.store.get_step(&step.id).await?.is_none() {
            return Err(CatalogError::StepNotFound(step.id));
        }
        self.write_step(step).await
    }

    pub async fn delete_step(&self, step_id: &str) -> Result<(), CatalogError> {
        let _guard = self.admin_lock.lock().await;
        if !self.store.delete_step(step_id).await? {
            return Err(CatalogError::StepNotFound(step_id.to_string()));
        }
        info!(step = %step_id, "Deleted step");
        self.invalidate().await
    }

    /// Enable or disable a step; returns the updated definition
    pub async fn set_step_enabled(
        &self,
        step_id: &str,
        enabled: bool,
    ) -> Result<PipelineStepDefinition, CatalogError> {
        let _guard = self.admin_lock.lock().await;
        let mut step = self
            .store
            .get_step(step_id)
            .await?
            .ok_or_else(|| CatalogError::StepNotFound(step_id.to_string()))?;
        step.enabled = enabled;
        self.write_step(step.clone()).await?;
        Ok(step)
    }

    async fn write_step(&self, step: PipelineStepDefinition) -> Result<(), CatalogError> {
        if let Some(ref class_id) = step.document_class_id {
            if self.store.get_class(class_id).await?.is_none() {
                return Err(CatalogError::UnknownClass {
                    step: step.id.clone(),
                    class_id: class_id.clone(),
                });
            }
        }

        let mut steps: Vec<_> = self
            .store
            .list_steps()
            .await?
            .into_iter()
            .filter(|s| s.id != step.id)
            .collect();
        steps.push(step.clone());
        check_scope_invariants(&steps)?;

        self.store.upsert_step(&step).await?;
        info!(step = %step.id, enabled = step.enabled, "Saved step");
        self.invalidate().await
    }
}
