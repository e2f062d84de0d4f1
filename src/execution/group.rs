//! Fan-in of a batch's results into the job's working text

use crate::core::step::{OutputMode, PipelineStepDefinition};
use crate::execution::executor::StepResult;
use std::cmp::Reverse;

/// Outcome of folding a batch's successful members into the working text
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMerge {
    /// New working text (the input unchanged when no transform succeeded)
    pub text: String,
    /// Secondary-language translation produced by the batch, if any
    pub secondary: Option<String>,
    /// Step whose transform output won
    pub winner: Option<String>,
}

/// Merge rule: among successful `Transform` members the highest
/// `merge_precedence` wins, ties going to the lower `order`. With no
/// successful transform the input passes through. `Inspect` members never
/// touch the text.
pub fn merge_outputs(
    input: &str,
    succeeded: &[(&PipelineStepDefinition, &StepResult)],
) -> GroupMerge {
    let pick = |mode: OutputMode| {
        succeeded
            .iter()
            .filter(|(step, _)| step.effective_output_mode() == mode)
            .max_by_key(|(step, _)| {
                (
                    step.merge_precedence,
                    Reverse(step.order),
                    Reverse(step.id.clone()),
                )
            })
    };

    let transform = pick(OutputMode::Transform);
    let secondary = pick(OutputMode::SecondaryTranslation);

    GroupMerge {
        text: transform
            .map(|(_, result)| result.output.clone())
            .unwrap_or_else(|| input.to_string()),
        secondary: secondary.map(|(_, result)| result.output.clone()),
        winner: transform.map(|(step, _)| step.id.clone()),
    }
}
