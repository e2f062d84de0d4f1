//! Execution events emitted while a job runs

use crate::core::state::{EngineStage, JobStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Events that can occur during a job
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    JobStarted {
        job_id: Uuid,
        planned_steps: usize,
    },
    StageEntered {
        job_id: Uuid,
        stage: EngineStage,
        progress: u8,
    },
    StepStarted {
        job_id: Uuid,
        step_id: String,
        step_name: String,
        attempt: u32,
    },
    StepRetrying {
        job_id: Uuid,
        step_id: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    StepCompleted {
        job_id: Uuid,
        step_id: String,
        progress: u8,
    },
    /// Step failed but the job continues with the step's input
    StepDegraded {
        job_id: Uuid,
        step_id: String,
        error: String,
    },
    StepFailed {
        job_id: Uuid,
        step_id: String,
        error: String,
    },
    ClassDetected {
        job_id: Uuid,
        class_key: Option<String>,
        fallback: bool,
    },
    JobHalted {
        job_id: Uuid,
        step_id: String,
        reason: String,
    },
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of execution events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn emit(&self, event: ExecutionEvent) {
        // handlers may subscribe from inside a callback
        let handlers: Vec<EventHandler> = self.handlers.read().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}
