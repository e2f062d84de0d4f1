//! CLI command definitions

use clap::{Args, ValueEnum};
use crate::core::config::SchedulingStrategy;

/// Run a document through the pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the catalog YAML file (classes and steps)
    #[arg(short, long)]
    pub file: String,

    /// Document to translate
    #[arg(short, long)]
    pub input: String,

    /// Content type of the input document
    #[arg(long, default_value = "text/plain")]
    pub content_type: String,

    /// Task runner command line; receives each rendered step on stdin
    #[arg(long)]
    pub runner: String,

    /// Per-attempt runner timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub runner_timeout: u64,

    /// Also produce a translation into this language
    #[arg(long)]
    pub target_language: Option<String>,

    /// Path to an engine config YAML file
    #[arg(long)]
    pub engine: Option<String>,

    /// Override the engine's scheduling strategy
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Extra template variables (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Don't save the job to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a catalog file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the catalog YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the resolved step plan for a document class
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to the catalog YAML file
    #[arg(short, long)]
    pub file: String,

    /// Document class key to resolve for (universal steps only if omitted)
    #[arg(short, long)]
    pub class: Option<String>,

    /// Include secondary-translation steps
    #[arg(long)]
    pub target_language: Option<String>,
}

/// Show job history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent jobs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single job with its step executions
    #[arg(long)]
    pub job_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Grouped,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Grouped => SchedulingStrategy::Grouped,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
