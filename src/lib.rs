//! medpipe - configuration-driven orchestration engine for multi-stage
//! medical document translation

pub mod catalog;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use catalog::{CatalogError, DocumentClassRegistry, InMemoryConfigStore, MemoryCache, StepCatalog};
pub use crate::core::config::{CatalogConfig, EngineConfig, RetryConfig, SchedulingStrategy};
pub use crate::core::{DocumentClass, JobStatus, PipelineJob, PipelineStepDefinition, ResultBundle, StopSignal};
pub use execution::{
    CancelMode, DocumentInput, EngineError, ExecutionEvent, JobOptions, JobOutcome, PipelineEngine,
    PipelineService, ServiceError,
};
pub use persistence::{InMemoryJobStore, JobStateStore};
pub use runner::{SubprocessTaskRunner, TaskOutput, TaskRequest, TaskRunner, TaskRunnerError};
