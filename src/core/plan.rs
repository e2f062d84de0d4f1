//! Plan resolution
//!
//! A plan is a pure function of a catalog snapshot and the job's state
//! (detected class, steps already run, whether a target language was
//! requested). Nothing here touches the cache or the store.

use crate::core::step::{OutputMode, PipelineStepDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An immutable, ordered view of the enabled steps at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    steps: Vec<PipelineStepDefinition>,
}

impl CatalogSnapshot {
    /// Build a snapshot from any step set; disabled steps are dropped
    pub fn new(steps: Vec<PipelineStepDefinition>) -> Self {
        let mut steps: Vec<_> = steps.into_iter().filter(|s| s.enabled).collect();
        steps.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.is_universal().cmp(&b.is_universal()).reverse())
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { steps }
    }

    /// All enabled steps, by `order`
    pub fn steps(&self) -> &[PipelineStepDefinition] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn get(&self, step_id: &str) -> Option<&PipelineStepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The universal branching step, if one is enabled
    pub fn branching_step(&self) -> Option<&PipelineStepDefinition> {
        self.steps
            .iter()
            .find(|s| s.is_branching_step && s.is_universal())
    }

    /// Steps scoped to one class, by `order`
    pub fn steps_for_class(&self, class_id: &str) -> Vec<PipelineStepDefinition> {
        self.steps
            .iter()
            .filter(|s| s.document_class_id.as_deref() == Some(class_id))
            .cloned()
            .collect()
    }
}

/// The full ordered plan for a job, split into engine phases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPlan {
    /// Universal steps up to and including the branching step
    pub pre_branching: Vec<PipelineStepDefinition>,
    /// Class-scoped steps interleaved with the remaining universal steps
    pub post_branching: Vec<PipelineStepDefinition>,
    /// Secondary-language translation steps
    pub finalizing: Vec<PipelineStepDefinition>,
}

impl ResolvedPlan {
    pub fn steps(&self) -> impl Iterator<Item = &PipelineStepDefinition> {
        self.pre_branching
            .iter()
            .chain(self.post_branching.iter())
            .chain(self.finalizing.iter())
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pre_branching.len() + self.post_branching.len() + self.finalizing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_secondary(step: &PipelineStepDefinition) -> bool {
    step.effective_output_mode() == OutputMode::SecondaryTranslation
}

fn applies_to(step: &PipelineStepDefinition, class_id: Option<&str>) -> bool {
    match step.document_class_id.as_deref() {
        None => true,
        Some(scoped) => class_id == Some(scoped),
    }
}

/// Universal steps that run before classification, ending with the branching step.
/// Empty when the catalog has no branching step.
pub fn resolve_pre_branching(snapshot: &CatalogSnapshot) -> Vec<PipelineStepDefinition> {
    let Some(branching) = snapshot.branching_step() else {
        return Vec::new();
    };

    snapshot
        .steps()
        .iter()
        .filter(|s| s.is_universal() && !s.post_branching && !is_secondary(s))
        .filter(|s| s.order < branching.order)
        .chain(std::iter::once(branching))
        .cloned()
        .collect()
}

/// Steps left to run once the class is known: class-scoped steps for `class_id`
/// interleaved by `order` with universal steps not yet executed
pub fn resolve_post_branching(
    snapshot: &CatalogSnapshot,
    class_id: Option<&str>,
    executed: &HashSet<String>,
) -> Vec<PipelineStepDefinition> {
    let branching_id = snapshot.branching_step().map(|s| s.id.as_str());

    snapshot
        .steps()
        .iter()
        .filter(|s| applies_to(s, class_id))
        .filter(|s| !is_secondary(s))
        .filter(|s| Some(s.id.as_str()) != branching_id)
        .filter(|s| !executed.contains(&s.id))
        .cloned()
        .collect()
}

/// Secondary-language translation steps; only when a target language was requested
pub fn resolve_finalizing(
    snapshot: &CatalogSnapshot,
    class_id: Option<&str>,
    has_target_language: bool,
) -> Vec<PipelineStepDefinition> {
    if !has_target_language {
        return Vec::new();
    }
    snapshot
        .steps()
        .iter()
        .filter(|s| applies_to(s, class_id) && is_secondary(s))
        .cloned()
        .collect()
}

/// The whole plan a job classified into `class_id` would follow
pub fn resolve_plan(
    snapshot: &CatalogSnapshot,
    class_id: Option<&str>,
    has_target_language: bool,
) -> ResolvedPlan {
    let pre_branching = resolve_pre_branching(snapshot);
    let executed: HashSet<String> = pre_branching.iter().map(|s| s.id.clone()).collect();

    ResolvedPlan {
        post_branching: resolve_post_branching(snapshot, class_id, &executed),
        finalizing: resolve_finalizing(snapshot, class_id, has_target_language),
        pre_branching,
    }
}
