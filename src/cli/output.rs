//! CLI output formatting

use crate::core::state::{JobStatus, PipelineJob, StepExecution, StepStatus};
use crate::core::step::PipelineStepDefinition;
use crate::execution::ExecutionEvent;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "# ");

/// Create a job progress bar measured in percent
pub fn create_progress_bar() -> ProgressBar {
    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Feed a progress bar from engine events
pub fn track_progress(progress: &ProgressBar, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StageEntered { stage, progress: pct, .. } => {
            progress.set_position(*pct as u64);
            progress.set_message(stage.to_string());
        }
        ExecutionEvent::StepStarted { step_name, attempt, .. } => {
            if *attempt > 1 {
                progress.set_message(format!("{} (attempt {})", step_name, attempt));
            } else {
                progress.set_message(step_name.clone());
            }
        }
        ExecutionEvent::StepCompleted { progress: pct, .. } => {
            progress.set_position(*pct as u64);
        }
        ExecutionEvent::JobFinished { .. } => progress.finish_and_clear(),
        _ => {}
    }

    if let Some(line) = format_execution_event(event) {
        progress.println(line);
    }
}

/// Format a job status for display
pub fn format_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => style("PENDING").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Completed => style("COMPLETED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Halted => style("HALTED").magenta().to_string(),
    }
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Completed => style("COMPLETED").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Line printed above the progress bar for notable events; routine
/// progress updates return None
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::JobStarted { job_id, planned_steps } => format!(
            "{} Job {} started ({} universal steps planned)",
            INFO,
            style(short_id(&job_id.to_string())).dim(),
            planned_steps
        ),
        ExecutionEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
            delay_ms,
            error,
            ..
        } => format!(
            "{} {} failed (attempt {}/{}), retrying in {}ms: {}",
            WARN,
            style(step_id).yellow(),
            attempt,
            max_attempts,
            delay_ms,
            style(error).dim()
        ),
        ExecutionEvent::StepCompleted { step_id, .. } => {
            format!("{} {}", CHECK, style(step_id).green())
        }
        ExecutionEvent::StepDegraded { step_id, error, .. } => format!(
            "{} {} skipped, input passed through: {}",
            WARN,
            style(step_id).yellow(),
            style(error).dim()
        ),
        ExecutionEvent::StepFailed { step_id, error, .. } => {
            format!("{} {}: {}", CROSS, style(step_id).red(), style(error).dim())
        }
        ExecutionEvent::ClassDetected {
            class_key,
            fallback,
            ..
        } => {
            let key = class_key.as_deref().unwrap_or("none");
            if *fallback {
                format!("{} Document class {} (fallback)", INFO, style(key).yellow())
            } else {
                format!("{} Document class {}", INFO, style(key).cyan())
            }
        }
        ExecutionEvent::JobHalted { step_id, reason, .. } => format!(
            "{} Halted by {}: {}",
            STOP,
            style(step_id).magenta(),
            reason
        ),
        ExecutionEvent::StageEntered { .. }
        | ExecutionEvent::StepStarted { .. }
        | ExecutionEvent::JobFinished { .. } => return None,
    };
    Some(line)
}

/// One-line job summary for history listings
pub fn format_job_summary(job: &PipelineJob) -> String {
    let status_icon = match job.status {
        JobStatus::Completed => CHECK,
        JobStatus::Failed => CROSS,
        JobStatus::Halted => STOP,
        JobStatus::Running => SPINNER,
        JobStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} - {} - {}",
        status_icon,
        style(short_id(&job.job_id.to_string())).dim(),
        style(job.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        format_status(job.status),
        style(job.detected_document_class.as_deref().unwrap_or("-")).bold(),
        style(format!("{}%", job.progress_percent)).cyan()
    )
}

/// One line per step execution row
pub fn format_step_execution(row: &StepExecution) -> String {
    let mut line = format!(
        "{:>3}. {} {}",
        row.order,
        style(&row.step_name).bold(),
        format_step_status(row.status)
    );
    if row.retry_count > 0 {
        line.push_str(&format!(" ({} retries)", row.retry_count));
    }
    if let Some(ms) = row.duration_ms {
        line.push_str(&format!(" {}", style(format_duration(Duration::from_millis(ms))).dim()));
    }
    if let Some(confidence) = row.confidence {
        line.push_str(&format!(" conf={:.2}", confidence));
    }
    if let Some(ref error) = row.error {
        line.push_str(&format!(" {}", style(error).red()));
    }
    line
}

/// One line per planned step
pub fn format_plan_step(step: &PipelineStepDefinition) -> String {
    let mut tags = vec![step.scope().to_string()];
    if step.is_branching_step {
        tags.push("branching".to_string());
    }
    if step.mandatory {
        tags.push("mandatory".to_string());
    }
    if let Some(ref group) = step.concurrency_group {
        tags.push(format!("group={} precedence={}", group, step.merge_precedence));
    }

    format!(
        "{:>3}. {} {} {}",
        step.order,
        style(&step.name).bold(),
        style(format!("({})", step.id)).dim(),
        style(format!("[{}]", tags.join(", "))).cyan()
    )
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Horizontal rule across the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
