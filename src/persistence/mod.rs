//! Persistence layer for job and step execution state

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteJobStore;

use crate::core::state::{PipelineJob, StepExecution, StepStatus};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for job state backends
#[async_trait::async_trait]
pub trait JobStateStore: Send + Sync {
    /// Insert or replace a job
    async fn save_job(&self, job: &PipelineJob) -> Result<()>;

    async fn load_job(&self, job_id: Uuid) -> Result<Option<PipelineJob>>;

    /// Most recently created jobs first
    async fn list_jobs(&self, limit: usize) -> Result<Vec<PipelineJob>>;

    /// Insert or replace the row for `(job_id, step_id)`
    async fn save_step_execution(&self, execution: &StepExecution) -> Result<()>;

    /// A job's step rows, by step order
    async fn list_step_executions(&self, job_id: Uuid) -> Result<Vec<StepExecution>>;

    /// Null out document content for a job; returns false if the job is unknown
    async fn purge_content(&self, job_id: Uuid) -> Result<bool>;

    /// Mark every non-terminal step row of a job as failed; returns how many changed
    async fn abandon_running_steps(&self, job_id: Uuid, reason: &str) -> Result<usize>;
}

/// In-memory job store (for tests or ephemeral use)
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, PipelineJob>>,
    executions: RwLock<HashMap<Uuid, Vec<StepExecution>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_executions(rows: &mut [StepExecution]) {
    rows.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.step_id.cmp(&b.step_id)));
}

#[async_trait::async_trait]
impl JobStateStore for InMemoryJobStore {
    async fn save_job(&self, job: &PipelineJob) -> Result<()> {
        self.jobs.write().await.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<PipelineJob>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<PipelineJob>> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn save_step_execution(&self, execution: &StepExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        let rows = executions.entry(execution.job_id).or_default();
        match rows.iter_mut().find(|r| r.step_id == execution.step_id) {
            Some(row) => *row = execution.clone(),
            None => rows.push(execution.clone()),
        }
        Ok(())
    }

    async fn list_step_executions(&self, job_id: Uuid) -> Result<Vec<StepExecution>> {
        let mut rows = self
            .executions
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        sort_executions(&mut rows);
        Ok(rows)
    }

    async fn purge_content(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        job.purge_content();

        if let Some(rows) = self.executions.write().await.get_mut(&job_id) {
            rows.iter_mut().for_each(StepExecution::purge_content);
        }
        Ok(true)
    }

    async fn abandon_running_steps(&self, job_id: Uuid, reason: &str) -> Result<usize> {
        let mut executions = self.executions.write().await;
        let Some(rows) = executions.get_mut(&job_id) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| !r.status.is_terminal()) {
            row.status = StepStatus::Failed;
            row.error = Some(reason.to_string());
            row.completed_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }
}
