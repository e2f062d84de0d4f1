//! Pipeline execution engine
//!
//! [`PipelineEngine`] drives one job through its stages, [`StepExecutor`]
//! runs individual steps with retries, and [`PipelineService`] runs jobs in
//! the background and answers queries about them.

pub mod cancel;
pub mod engine;
pub mod events;
pub mod executor;
pub mod group;
pub mod scheduler;
pub mod service;

pub use cancel::{cancellation, CancelHandle, CancelMode, CancelSignal};
pub use engine::{DocumentInput, EngineError, JobOptions, PipelineEngine};
pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use executor::{StepExecutor, StepFailure, StepResult};
pub use group::{merge_outputs, GroupMerge};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy, StepBatch};
pub use service::{JobOutcome, JobStatusView, PipelineService, ServiceError};
