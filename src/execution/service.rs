//! Job service - submits jobs to the engine in the background and answers
//! status, result, cancel and purge requests

use crate::core::condition::StopSignal;
use crate::core::state::{EngineStage, JobStatus, PipelineJob, ResultBundle};
use crate::execution::cancel::{cancellation, CancelHandle, CancelMode};
use crate::execution::engine::{DocumentInput, JobOptions, PipelineEngine};
use crate::persistence::JobStateStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    DuplicateJob(Uuid),

    #[error("job is still {0}")]
    NotFinished(JobStatus),

    #[error("job failed: {0}")]
    Failed(String),

    #[error("result content has been purged")]
    ResultPurged,

    #[error("store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Store(format!("{:#}", err))
    }
}

/// Status snapshot of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub stage: EngineStage,
    pub progress_percent: u8,
    pub current_step: Option<String>,
    pub error: Option<String>,
}

impl From<&PipelineJob> for JobStatusView {
    fn from(job: &PipelineJob) -> Self {
        Self {
            status: job.status,
            stage: job.stage,
            progress_percent: job.progress_percent,
            current_step: job.current_step.clone(),
            error: job.error.clone(),
        }
    }
}

/// Result of a finished, successful job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(ResultBundle),
    /// Stopped early by a stop condition; not an error
    Halted(StopSignal),
}

struct RunningJob {
    cancel: CancelHandle,
    done: watch::Receiver<Option<PipelineJob>>,
}

/// Front door for job submission and queries
#[derive(Clone)]
pub struct PipelineService {
    engine: Arc<PipelineEngine>,
    store: Arc<dyn JobStateStore>,
    running: Arc<Mutex<HashMap<Uuid, RunningJob>>>,
}

impl PipelineService {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        let store = engine.store().clone();
        Self {
            engine,
            store,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    /// Create a PENDING job and run it in the background
    pub async fn submit(
        &self,
        job_id: Uuid,
        document: DocumentInput,
        options: JobOptions,
    ) -> Result<Uuid, ServiceError> {
        let in_flight = self.running.lock().contains_key(&job_id);
        if in_flight || self.store.load_job(job_id).await?.is_some() {
            return Err(ServiceError::DuplicateJob(job_id));
        }

        let job = PipelineJob::new(job_id, options.target_language.clone());
        self.store.save_job(&job).await?;

        let (cancel, signal) = cancellation();
        let (done_tx, done_rx) = watch::channel(None);
        self.running.lock().insert(
            job_id,
            RunningJob {
                cancel,
                done: done_rx,
            },
        );

        info!(job_id = %job_id, "Job submitted");
        let engine = self.engine.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let finished = engine.run(job, document, options, signal).await;
            running.lock().remove(&job_id);
            let _ = done_tx.send(Some(finished));
        });

        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView, ServiceError> {
        let job = self.load(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// Result of a terminal job
    pub async fn get_result(&self, job_id: Uuid) -> Result<JobOutcome, ServiceError> {
        let job = self.load(job_id).await?;
        match job.status {
            JobStatus::Completed => job
                .result
                .map(JobOutcome::Completed)
                .ok_or(ServiceError::ResultPurged),
            JobStatus::Halted => job
                .halt
                .map(JobOutcome::Halted)
                .ok_or(ServiceError::ResultPurged),
            JobStatus::Failed => Err(ServiceError::Failed(job.error.unwrap_or_default())),
            status => Err(ServiceError::NotFinished(status)),
        }
    }

    /// Request cancellation; false if the job is not running
    pub fn cancel(&self, job_id: Uuid, mode: CancelMode) -> bool {
        match self.running.lock().get(&job_id) {
            Some(job) => {
                info!(job_id = %job_id, ?mode, "Cancellation requested");
                job.cancel.cancel(mode);
                true
            }
            None => false,
        }
    }

    /// Wait for a job to reach a terminal state
    pub async fn wait(&self, job_id: Uuid) -> Result<PipelineJob, ServiceError> {
        let done = self.running.lock().get(&job_id).map(|job| job.done.clone());

        if let Some(mut done) = done {
            if let Ok(finished) = done.wait_for(|job| job.is_some()).await {
                if let Some(job) = finished.clone() {
                    return Ok(job);
                }
            }
        }
        self.load(job_id).await
    }

    /// Drop document content of a finished job
    pub async fn purge_content(&self, job_id: Uuid) -> Result<(), ServiceError> {
        let job = self.load(job_id).await?;
        if !job.is_terminal() {
            return Err(ServiceError::NotFinished(job.status));
        }
        self.store.purge_content(job_id).await?;
        debug!(job_id = %job_id, "Purged job content");
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<PipelineJob, ServiceError> {
        self.store
            .load_job(job_id)
            .await?
            .ok_or(ServiceError::NotFound(job_id))
    }
}
