//! Execution scheduler - groups a resolved plan into batches

pub use crate::core::config::SchedulingStrategy;
use crate::core::step::PipelineStepDefinition;

/// Steps dispatched together and joined before the plan proceeds
#[derive(Debug, Clone, PartialEq)]
pub struct StepBatch {
    /// Concurrency group shared by the members (None for a lone step)
    pub group: Option<String>,
    /// Members in plan order
    pub steps: Vec<PipelineStepDefinition>,
}

impl StepBatch {
    fn single(step: PipelineStepDefinition) -> Self {
        Self {
            group: None,
            steps: vec![step],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_concurrent(&self) -> bool {
        self.steps.len() > 1
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.id == step_id)
    }

    /// Short label for status display
    pub fn label(&self) -> String {
        match &self.group {
            Some(group) if self.is_concurrent() => format!(
                "{} ({})",
                group,
                self.steps
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" + ")
            ),
            _ => self
                .steps
                .first()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
        }
    }
}

/// Scheduler for turning an ordered plan into batches
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Split an ordered plan into batches. Under `Grouped`, adjacent steps
    /// sharing a concurrency group form one batch; everything else runs alone.
    pub fn batches(&self, plan: &[PipelineStepDefinition]) -> Vec<StepBatch> {
        match self.strategy {
            SchedulingStrategy::Sequential => {
                plan.iter().cloned().map(StepBatch::single).collect()
            }
            SchedulingStrategy::Grouped => self.grouped(plan),
        }
    }

    fn grouped(&self, plan: &[PipelineStepDefinition]) -> Vec<StepBatch> {
        let mut batches: Vec<StepBatch> = Vec::new();

        for step in plan {
            let joins_last = match (&step.concurrency_group, batches.last()) {
                (Some(group), Some(last)) => last.group.as_ref() == Some(group),
                _ => false,
            };

            if joins_last {
                if let Some(last) = batches.last_mut() {
                    last.steps.push(step.clone());
                }
                continue;
            }
            batches.push(StepBatch {
                group: step.concurrency_group.clone(),
                steps: vec![step.clone()],
            });
        }

        batches
    }
}
