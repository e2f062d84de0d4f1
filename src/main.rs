use anyhow::{Context, Result};
use medpipe::catalog::{DocumentClassRegistry, InMemoryConfigStore, MemoryCache, StepCatalog};
use medpipe::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use medpipe::cli::output::*;
use medpipe::cli::{Cli, Command};
use medpipe::core::config::{CatalogConfig, EngineConfig};
use medpipe::core::document_class::normalize_key;
use medpipe::core::plan::{resolve_plan, CatalogSnapshot};
use medpipe::core::state::JobStatus;
use medpipe::execution::{DocumentInput, JobOptions, JobOutcome, PipelineEngine, PipelineService};
use medpipe::persistence::{InMemoryJobStore, JobStateStore};
use medpipe::runner::client::RunnerConfig;
use medpipe::runner::SubprocessTaskRunner;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_document(cmd).await?,
        Command::Validate(cmd) => validate_catalog(cmd)?,
        Command::Plan(cmd) => show_plan(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn run_document(cmd: &RunCommand) -> Result<()> {
    let catalog_config =
        CatalogConfig::from_file(&cmd.file).context("Failed to load catalog")?;
    let mut engine_config = match &cmd.engine {
        Some(path) => EngineConfig::from_file(path).context("Failed to load engine config")?,
        None => EngineConfig::default(),
    };
    if let Some(strategy) = cmd.strategy {
        engine_config.scheduling = strategy.into();
    }

    let bytes = std::fs::read(&cmd.input)
        .with_context(|| format!("Failed to read input document {}", cmd.input))?;

    let runner_config = RunnerConfig::from_command_line(&cmd.runner)
        .context("Runner command is empty")?
        .with_timeout(cmd.runner_timeout);

    println!(
        "{} Loaded catalog: {} classes, {} steps",
        INFO,
        style(catalog_config.classes.len()).cyan(),
        style(catalog_config.steps.len()).cyan()
    );

    let store = open_store(cmd.no_history).await?;
    let catalog = Arc::new(StepCatalog::new(
        Arc::new(InMemoryConfigStore::from_config(&catalog_config)),
        Arc::new(MemoryCache::new()),
        engine_config.catalog_ttl(),
    ));
    let classes = Arc::new(DocumentClassRegistry::new(catalog.clone()));
    let engine = PipelineEngine::new(
        catalog,
        classes,
        Arc::new(SubprocessTaskRunner::new(runner_config)),
        store.clone(),
        engine_config,
    );

    let progress = create_progress_bar();
    let bar = progress.clone();
    engine.add_event_handler(move |event| track_progress(&bar, &event));

    let service = PipelineService::new(Arc::new(engine));
    let mut options = JobOptions {
        target_language: cmd.target_language.clone(),
        ..Default::default()
    };
    options.variables.extend(cmd.variable.iter().cloned());

    let job_id = service
        .submit(
            Uuid::new_v4(),
            DocumentInput::new(bytes, cmd.content_type.clone()),
            options,
        )
        .await?;
    let job = service.wait(job_id).await?;
    progress.finish_and_clear();

    println!("{}", separator());
    match service.get_result(job_id).await {
        Ok(JobOutcome::Completed(bundle)) => {
            println!(
                "{} Completed as {} (confidence {:.2}, {} steps, {})",
                CHECK,
                style(bundle.detected_class.as_deref().unwrap_or("-")).bold(),
                bundle.aggregate_confidence,
                bundle.steps_executed,
                format_duration(std::time::Duration::from_millis(bundle.total_time_ms))
            );
            if !bundle.degraded_steps.is_empty() {
                println!(
                    "{} Passed through after failure: {}",
                    WARN,
                    style(bundle.degraded_steps.join(", ")).yellow()
                );
            }
            println!("\n{}", bundle.final_text);
            if let Some(secondary) = &bundle.secondary_translation {
                println!(
                    "\n{} {}\n{}",
                    INFO,
                    style(bundle.target_language.as_deref().unwrap_or("translation")).bold(),
                    secondary
                );
            }
        }
        Ok(JobOutcome::Halted(signal)) => {
            println!(
                "{} Stopped at {}: {}",
                STOP,
                style(&signal.step_name).bold(),
                signal.user_message
            );
        }
        Err(e) => {
            println!("{} Job {}", CROSS, style("failed").red());
            error!(job_id = %job_id, "{}", e);
            std::process::exit(1);
        }
    }

    if !cmd.no_history {
        println!(
            "\n{} Job saved to history (ID: {})",
            INFO,
            style(job.job_id).dim()
        );
    }

    Ok(())
}

fn validate_catalog(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating catalog...", INFO);

    match CatalogConfig::from_file(&cmd.file) {
        Ok(config) => {
            let snapshot = CatalogSnapshot::new(config.steps.clone());
            println!("{} Catalog is valid!", CHECK);
            println!("  Classes: {}", style(config.classes.len()).cyan());
            println!("  Steps: {} ({} enabled)", style(config.steps.len()).cyan(), snapshot.len());
            match snapshot.branching_step() {
                Some(step) => println!("  Branching step: {}", style(&step.name).bold()),
                None => println!("{} No enabled branching step", WARN),
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn show_plan(cmd: &PlanCommand) -> Result<()> {
    let config = CatalogConfig::from_file(&cmd.file).context("Failed to load catalog")?;

    let class_id = match &cmd.class {
        Some(key) => {
            let key = normalize_key(key);
            let class = config
                .classes
                .iter()
                .find(|c| c.key == key)
                .with_context(|| format!("Unknown document class '{}'", key))?;
            Some(class.id.clone())
        }
        None => None,
    };

    let snapshot = CatalogSnapshot::new(config.steps);
    let plan = resolve_plan(&snapshot, class_id.as_deref(), cmd.target_language.is_some());

    println!(
        "{} Plan for {} ({} steps):",
        INFO,
        style(cmd.class.as_deref().unwrap_or("universal steps only")).bold(),
        plan.len()
    );
    for step in plan.steps() {
        println!("  {}", format_plan_step(step));
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;

    if let Some(id) = &cmd.job_id {
        let job_id = Uuid::parse_str(id).context("Invalid job ID format")?;
        let Some(job) = store.load_job(job_id).await? else {
            println!("{} Job not found", WARN);
            return Ok(());
        };
        let rows = store.list_step_executions(job_id).await?;

        if cmd.json {
            let data = serde_json::json!({ "job": job, "steps": rows });
            println!("{}", serde_json::to_string_pretty(&data)?);
            return Ok(());
        }

        println!("{} Job Details", INFO);
        println!("  ID: {}", style(job.job_id).cyan());
        println!("  Status: {}", format_status(job.status));
        println!("  Created: {}", style(job.created_at.to_rfc3339()).dim());
        if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
            if let Ok(duration) = completed.signed_duration_since(started).to_std() {
                println!("  Duration: {}", style(format_duration(duration)).dim());
            }
        }
        if let Some(class) = &job.detected_document_class {
            println!("  Class: {}", style(class).bold());
        }
        if job.status == JobStatus::Failed {
            if let Some(error) = &job.error {
                println!("  Error: {}", style(error).red());
            }
        }
        if let Some(signal) = &job.halt {
            println!("  Halted: {} ({})", signal.user_message, style(&signal.reason).dim());
        }
        println!("\n  {}", style("Steps:").bold());
        for row in &rows {
            println!("  {}", format_step_execution(row));
        }
        return Ok(());
    }

    let jobs = store.list_jobs(cmd.limit).await?;
    if jobs.is_empty() {
        println!("{} No jobs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Job history (showing latest {}):", INFO, cmd.limit);
        for job in &jobs {
            println!("  {}", format_job_summary(job));
        }
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(ephemeral: bool) -> Result<Arc<dyn JobStateStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryJobStore::new()));
    }
    let store = medpipe::persistence::SqliteJobStore::with_default_path()
        .await
        .context("Failed to open job history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_ephemeral: bool) -> Result<Arc<dyn JobStateStore>> {
    Ok(Arc::new(InMemoryJobStore::new()))
}
