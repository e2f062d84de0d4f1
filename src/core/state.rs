//! Job and step execution state models

use crate::core::condition::StopSignal;
use crate::core::step::PipelineStepDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Overall job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Stopped early by a stop condition
    Halted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Halted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Halted => "HALTED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "HALTED" => Ok(JobStatus::Halted),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Status of a single step execution row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            "SKIPPED" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status: {}", other)),
        }
    }
}

/// Engine state machine position for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStage {
    NotStarted,
    Extracting,
    Validating,
    Classifying,
    Processing,
    Finalizing,
    Completed,
    Failed,
    Halted,
}

impl EngineStage {
    /// Fixed progress budget `(start, end)` for the stage, in percent
    pub fn progress_budget(&self) -> (u8, u8) {
        match self {
            EngineStage::NotStarted => (0, 0),
            EngineStage::Extracting => (0, 10),
            EngineStage::Validating => (10, 25),
            EngineStage::Classifying => (25, 35),
            EngineStage::Processing => (35, 90),
            EngineStage::Finalizing => (90, 100),
            EngineStage::Completed | EngineStage::Failed | EngineStage::Halted => (100, 100),
        }
    }

    /// Progress after `done` of `total` units of work in this stage
    pub fn progress_at(&self, done: usize, total: usize) -> u8 {
        let (start, end) = self.progress_budget();
        if total == 0 || done >= total {
            return end;
        }
        let span = (end - start) as usize;
        start + (span * done / total) as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStage::NotStarted => "NOT_STARTED",
            EngineStage::Extracting => "EXTRACTING",
            EngineStage::Validating => "VALIDATING",
            EngineStage::Classifying => "CLASSIFYING",
            EngineStage::Processing => "PROCESSING",
            EngineStage::Finalizing => "FINALIZING",
            EngineStage::Completed => "COMPLETED",
            EngineStage::Failed => "FAILED",
            EngineStage::Halted => "HALTED",
        }
    }
}

impl FromStr for EngineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(EngineStage::NotStarted),
            "EXTRACTING" => Ok(EngineStage::Extracting),
            "VALIDATING" => Ok(EngineStage::Validating),
            "CLASSIFYING" => Ok(EngineStage::Classifying),
            "PROCESSING" => Ok(EngineStage::Processing),
            "FINALIZING" => Ok(EngineStage::Finalizing),
            "COMPLETED" => Ok(EngineStage::Completed),
            "FAILED" => Ok(EngineStage::Failed),
            "HALTED" => Ok(EngineStage::Halted),
            other => Err(format!("unknown engine stage: {}", other)),
        }
    }
}

impl fmt::Display for EngineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub final_text: String,
    pub secondary_translation: Option<String>,
    pub target_language: Option<String>,
    pub detected_class: Option<String>,
    /// Mean of the confidences steps reported (1.0 if none reported)
    pub aggregate_confidence: f64,
    pub total_time_ms: u64,
    pub steps_executed: usize,
    /// Steps whose failure was absorbed by passing their input through
    #[serde(default)]
    pub degraded_steps: Vec<String>,
}

/// A document translation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stage: EngineStage,
    /// 0..=100, never decreases while running
    pub progress_percent: u8,
    pub current_step: Option<String>,
    pub detected_document_class: Option<String>,
    pub target_language: Option<String>,
    pub result: Option<ResultBundle>,
    pub halt: Option<StopSignal>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineJob {
    pub fn new(job_id: Uuid, target_language: Option<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            stage: EngineStage::NotStarted,
            progress_percent: 0,
            current_step: None,
            detected_document_class: None,
            target_language,
            result: None,
            halt: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move a pending job to running
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn enter_stage(&mut self, stage: EngineStage) {
        if !self.is_terminal() {
            self.stage = stage;
            self.advance_progress(stage.progress_budget().0);
        }
    }

    /// Raise progress; lower values are ignored
    pub fn advance_progress(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
    }

    pub fn complete(&mut self, bundle: ResultBundle) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.stage = EngineStage::Completed;
        self.detected_document_class = bundle.detected_class.clone();
        self.result = Some(bundle);
        self.progress_percent = 100;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.stage = EngineStage::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn halt(&mut self, signal: StopSignal) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Halted;
        self.stage = EngineStage::Halted;
        self.current_step = Some(signal.step_name.clone());
        self.halt = Some(signal);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Drop document content for compliance; status and timing stay intact
    pub fn purge_content(&mut self) {
        self.result = None;
    }
}

/// One logical row per (job, step)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub job_id: Uuid,
    pub step_id: String,
    pub step_name: String,
    pub order: i32,
    pub status: StepStatus,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub confidence: Option<f64>,
    /// Attempts beyond the first
    pub retry_count: u32,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StepExecution {
    pub fn new(job_id: Uuid, step: &PipelineStepDefinition, input: &str) -> Self {
        Self {
            job_id,
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            order: step.order,
            status: StepStatus::Pending,
            input_text: Some(input.to_string()),
            output_text: None,
            confidence: None,
            retry_count: 0,
            error: None,
            metadata: serde_json::Value::Null,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Mark the start of attempt `attempt` (1-based)
    pub fn begin_attempt(&mut self, attempt: u32) {
        self.status = StepStatus::Running;
        self.retry_count = attempt.saturating_sub(1);
        self.error = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn succeed(
        &mut self,
        output: &str,
        confidence: f64,
        metadata: serde_json::Value,
        duration_ms: u64,
    ) {
        self.status = StepStatus::Completed;
        self.output_text = Some(output.to_string());
        self.confidence = Some(confidence);
        self.metadata = metadata;
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
    }

    pub fn fail(&mut self, error: impl Into<String>, duration_ms: u64) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
    }

    pub fn purge_content(&mut self) {
        self.input_text = None;
        self.output_text = None;
    }
}

/// Arithmetic mean of reported confidences; 1.0 when nothing was reported
pub fn aggregate_confidence<I>(confidences: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let reported: Vec<f64> = confidences.into_iter().flatten().collect();
    if reported.is_empty() {
        1.0
    } else {
        reported.iter().sum::<f64>() / reported.len() as f64
    }
}
